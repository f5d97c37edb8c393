//! Rendezvous handoff between the HTTP endpoint and the reconciliation runtime.
//!
//! [`event_channel`] returns a cloneable [`EventSender`] for the request
//! handlers and a single [`EventReceiver`] for the consumer. A send only
//! completes once the consumer has taken the notification, so a handler that
//! answers `200` knows the event has been delivered.
//!
//! Each notification travels with a one-shot acknowledgement. When a producer
//! gives up (shutdown or dispatch timeout) it closes its acknowledgement, and
//! the receiver silently skips that notification. A notification is therefore
//! delivered if and only if its send returned `Ok`.

use crate::watcher_event::ChangeNotification;
use async_trait::async_trait;
use futures::Stream;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a notification could not be handed to the consumer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The shutdown token fired before a consumer took the notification.
    #[error("listener is shutting down")]
    Cancelled,

    /// No consumer took the notification within the dispatch timeout.
    #[error("no consumer received the event in time")]
    TimedOut,

    /// The consumer side of the channel has been dropped.
    #[error("event consumer is gone")]
    Closed,
}

struct Envelope {
    notification: ChangeNotification,
    ack: oneshot::Sender<()>,
}

/// Creates a connected sender/receiver pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    // A single slot; delivery is confirmed through the per-envelope ack.
    let (tx, rx) = mpsc::channel(1);
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer half, shared by all request handlers.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<Envelope>,
}

impl EventSender {
    /// Hands a notification to the consumer, waiting as long as it takes.
    pub async fn send(&self, notification: ChangeNotification) -> Result<(), DispatchError> {
        self.send_with_cancel(notification, &CancellationToken::new(), None)
            .await
    }

    /// Hands a notification to the consumer unless `token` fires or `timeout`
    /// elapses first.
    ///
    /// On `Err` the notification is guaranteed not to reach the consumer.
    pub async fn send_with_cancel(
        &self,
        notification: ChangeNotification,
        token: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<(), DispatchError> {
        let (ack_tx, mut ack_rx) = oneshot::channel();
        let envelope = Envelope {
            notification,
            ack: ack_tx,
        };

        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        tokio::select! {
            sent = self.tx.send(envelope) => sent.map_err(|_| DispatchError::Closed)?,
            _ = token.cancelled() => return Err(DispatchError::Cancelled),
            _ = &mut deadline => return Err(DispatchError::TimedOut),
        }

        let abandoned = tokio::select! {
            acked = &mut ack_rx => return acked.map_err(|_| DispatchError::Closed),
            _ = token.cancelled() => DispatchError::Cancelled,
            _ = &mut deadline => DispatchError::TimedOut,
        };

        // The consumer may have taken the envelope in the same instant.
        ack_rx.close();
        match ack_rx.try_recv() {
            Ok(()) => Ok(()),
            Err(_) => Err(abandoned),
        }
    }

    /// Returns true once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, handed to the reconciliation runtime.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Envelope>,
}

impl EventReceiver {
    /// Receives the next delivered notification.
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        loop {
            let envelope = self.rx.recv().await?;
            if envelope.ack.send(()).is_ok() {
                return Some(envelope.notification);
            }
            debug!(
                resource = %envelope.notification,
                "skipping notification abandoned by its producer"
            );
        }
    }

    /// Converts the receiver into a stream of notifications.
    pub fn into_stream(self) -> impl Stream<Item = ChangeNotification> + Send + Unpin {
        Box::pin(futures::stream::unfold(self, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|notification| (notification, receiver))
        }))
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("notification", &self.notification)
            .finish()
    }
}

/// A source of change notifications a reconciliation runtime can attach to.
///
/// The HTTP listener provides one through [`EventReceiver`]; any other
/// ingestion path (a message broker subscription, for example) can feed the
/// runtime by implementing this trait or by writing into an `mpsc` channel.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next notification; `None` means the source is exhausted.
    async fn next_event(&mut self) -> Option<ChangeNotification>;
}

#[async_trait]
impl EventSource for EventReceiver {
    async fn next_event(&mut self) -> Option<ChangeNotification> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for mpsc::Receiver<ChangeNotification> {
    async fn next_event(&mut self) -> Option<ChangeNotification> {
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::HashSet;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_send_waits_for_consumer() {
        let (sender, mut receiver) = event_channel();

        let send = tokio::spawn(async move {
            sender
                .send(ChangeNotification::new("ns1", "res1"))
                .await
        });

        sleep(Duration::from_millis(50)).await;
        assert!(!send.is_finished());

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification, ChangeNotification::new("ns1", "res1"));
        assert_eq!(send.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_cancelled_send_is_never_delivered() {
        let (sender, mut receiver) = event_channel();
        let token = CancellationToken::new();

        let blocked = {
            let sender = sender.clone();
            let token = token.clone();
            tokio::spawn(async move {
                sender
                    .send_with_cancel(ChangeNotification::new("ns1", "stale"), &token, None)
                    .await
            })
        };

        sleep(Duration::from_millis(50)).await;
        token.cancel();
        assert_eq!(blocked.await.unwrap(), Err(DispatchError::Cancelled));

        let fresh = tokio::spawn(async move {
            sender
                .send(ChangeNotification::new("ns1", "fresh"))
                .await
        });

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification.name, "fresh");
        assert_eq!(fresh.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_fails_fast() {
        let (sender, _receiver) = event_channel();
        let token = CancellationToken::new();
        token.cancel();

        let result = sender
            .send_with_cancel(ChangeNotification::new("ns1", "res1"), &token, None)
            .await;
        assert_eq!(result, Err(DispatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_send_times_out_without_consumer() {
        let (sender, _receiver) = event_channel();

        let result = sender
            .send_with_cancel(
                ChangeNotification::new("ns1", "res1"),
                &CancellationToken::new(),
                Some(Duration::from_millis(20)),
            )
            .await;
        assert_eq!(result, Err(DispatchError::TimedOut));
    }

    #[tokio::test]
    async fn test_send_fails_when_receiver_dropped() {
        let (sender, receiver) = event_channel();
        drop(receiver);

        assert!(sender.is_closed());
        let result = sender.send(ChangeNotification::new("ns1", "res1")).await;
        assert_eq!(result, Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn test_each_send_matches_one_receive() {
        let (sender, mut receiver) = event_channel();

        let mut sends = Vec::new();
        for i in 0..5 {
            let sender = sender.clone();
            sends.push(tokio::spawn(async move {
                sender
                    .send(ChangeNotification::new("ns", format!("res-{i}")))
                    .await
            }));
        }
        drop(sender);

        let mut names = HashSet::new();
        while let Some(notification) = receiver.recv().await {
            names.insert(notification.name);
        }

        assert_eq!(names.len(), 5);
        for send in sends {
            assert_eq!(send.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn test_duplicate_notifications_are_not_merged() {
        let (sender, receiver) = event_channel();

        tokio::spawn(async move {
            for _ in 0..2 {
                sender
                    .send(ChangeNotification::new("ns1", "res1"))
                    .await
                    .unwrap();
            }
        });

        let received: Vec<_> = receiver.into_stream().collect().await;
        assert_eq!(
            received,
            vec![
                ChangeNotification::new("ns1", "res1"),
                ChangeNotification::new("ns1", "res1"),
            ]
        );
    }

    #[tokio::test]
    async fn test_mpsc_receiver_is_an_event_source() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(ChangeNotification::new("ns1", "res1")).await.unwrap();
        drop(tx);

        assert_eq!(
            rx.next_event().await,
            Some(ChangeNotification::new("ns1", "res1"))
        );
        assert_eq!(rx.next_event().await, None);
    }
}
