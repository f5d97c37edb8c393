//! Lifecycle of the SKR events listener.
//!
//! [`SkrEventsListener::start`] binds the HTTP server, serves on a background
//! task and blocks until the supplied [`CancellationToken`] is cancelled. It
//! then shuts the server down gracefully: new connections are refused, and
//! requests still waiting for the consumer give up with `503` so that the
//! server can drain.
//!
//! Two adapters cover the ways an embedding runtime manages the listener:
//!
//! - [`Runnable`] for supervisors that start many services uniformly and
//!   cancel them together
//! - [`spawn_listener`] for callers that only want the event source and let
//!   the listener run in the background

use crate::channel::{event_channel, EventReceiver, EventSender};
use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventLogger};
use crate::handler::HandlerContext;
use crate::routes::listener_routes;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running service driven by a cancellation token.
///
/// `start` blocks until the token is cancelled and returns once the service
/// has shut down.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Runs the service until `token` is cancelled.
    async fn start(&self, token: CancellationToken) -> Result<()>;
}

/// HTTP listener turning SKR watcher events into change notifications.
pub struct SkrEventsListener {
    /// Listener configuration.
    config: ListenerConfig,

    /// Producer half shared with every request handler.
    sender: EventSender,

    /// Bus for observability events.
    event_bus: Arc<EventBus>,

    /// Address the server is currently bound to.
    bound_addr: watch::Sender<Option<SocketAddr>>,
}

impl SkrEventsListener {
    /// Creates a listener and the event source its notifications arrive on.
    ///
    /// The configuration is validated up front. If an event logger is
    /// configured it is subscribed to the listener's event bus.
    pub fn new(config: ListenerConfig) -> Result<(Self, EventReceiver)> {
        config.validate()?;

        let (sender, receiver) = event_channel();

        let event_bus = Arc::new(EventBus::new());
        if let Some(logger_config) = &config.event_logger {
            event_bus.subscribe(EventLogger::new(logger_config.clone()));
        }

        let (bound_addr, _) = watch::channel(None);

        let listener = Self {
            config,
            sender,
            event_bus,
            bound_addr,
        };
        Ok((listener, receiver))
    }

    /// Serves watcher events until `token` is cancelled.
    ///
    /// Startup failures (an address that does not resolve or cannot be
    /// bound) are logged and not returned: the call still blocks until
    /// cancellation so that a supervisor sees a uniform lifecycle.
    /// Errors during shutdown, including exceeding the shutdown grace
    /// period, are returned.
    pub async fn start(&self, token: CancellationToken) -> Result<()> {
        let addr = tokio::select! {
            biased;
            resolved = self.resolve_addr() => match resolved {
                Ok(addr) => Some(addr),
                Err(e) => {
                    error!(error = %e, "Webserver startup failed");
                    None
                }
            },
            _ = token.cancelled() => None,
        };

        let server = match addr {
            Some(addr) => self.serve(addr, &token).await,
            None => None,
        };

        token.cancelled().await;
        info!("SKR events listener is shutting down: context got closed");

        let result = match server {
            Some(handle) => self.await_shutdown(handle).await,
            None => Ok(()),
        };

        self.bound_addr.send_replace(None);
        self.event_bus.publish_server_stopped().await;
        result
    }

    async fn serve(&self, addr: SocketAddr, token: &CancellationToken) -> Option<JoinHandle<()>> {
        let ctx = Arc::new(HandlerContext {
            sender: self.sender.clone(),
            event_bus: self.event_bus.clone(),
            shutdown: token.child_token(),
            max_body_bytes: self.config.max_body_bytes,
            dispatch_timeout: self.config.dispatch_timeout(),
        });
        let routes = listener_routes(self.config.component.clone(), ctx);

        let shutdown_signal = {
            let token = token.clone();
            async move { token.cancelled().await }
        };

        match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal) {
            Ok((bound, server)) => {
                info!(address = %bound, "SKR events listener is starting up...");
                self.bound_addr.send_replace(Some(bound));
                self.event_bus.publish_server_started(bound.to_string()).await;
                Some(tokio::spawn(server))
            }
            Err(e) => {
                error!(address = %addr, error = %e, "Webserver startup failed");
                None
            }
        }
    }

    async fn await_shutdown(&self, mut handle: JoinHandle<()>) -> Result<()> {
        let grace = self.config.shutdown_grace();
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {
                info!("SKR events listener stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Shutdown(format!("server task failed: {}", e))),
            Err(_) => {
                handle.abort();
                Err(Error::Shutdown(format!(
                    "graceful shutdown did not finish within {:?}",
                    grace
                )))
            }
        }
    }

    async fn resolve_addr(&self) -> Result<SocketAddr> {
        let server_addr = self.config.server_addr();
        let mut resolved = tokio::net::lookup_host(server_addr.as_str())
            .await
            .map_err(|e| Error::Config(format!("Invalid address {}: {}", server_addr, e)))?;
        let addr = resolved
            .next()
            .ok_or_else(|| Error::Config(format!("Address {} did not resolve", server_addr)))?;
        Ok(addr)
    }

    /// Watches the address the server is bound to; `None` while not serving.
    pub fn bound_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.bound_addr.subscribe()
    }

    /// Returns another producer for the listener's event channel.
    ///
    /// Lets a second ingestion path feed the same consumer.
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Returns the event bus carrying the listener's observability events.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Returns a reference to the listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

#[async_trait]
impl Runnable for SkrEventsListener {
    async fn start(&self, token: CancellationToken) -> Result<()> {
        SkrEventsListener::start(self, token).await
    }
}

/// Starts a listener on a background task and returns its event source.
///
/// The task ends when `token` is cancelled; its result reports shutdown
/// errors, which are also logged.
pub fn spawn_listener(
    config: ListenerConfig,
    token: CancellationToken,
) -> Result<(JoinHandle<Result<()>>, EventReceiver)> {
    let (listener, receiver) = SkrEventsListener::new(config)?;

    let handle = tokio::spawn(async move {
        let result = listener.start(token).await;
        if let Err(e) = &result {
            error!(error = %e, "SKR events listener stopped with an error");
        }
        result
    });

    Ok((handle, receiver))
}
