//! HTTP listener for SKR watcher events.
//!
//! Watchers running in SKR clusters report changed resources by posting a
//! small JSON document to the listener. The listener validates and decodes
//! each request and hands a [`ChangeNotification`] to an in-process consumer,
//! typically a reconciliation loop, through an [`EventSource`].
//!
//! # Request Flow
//!
//! 1. **HTTP Request**: a watcher sends `POST /v{version}/{component}/event`
//! 2. **Decoding**: the contract version is checked, then the body is decoded
//!    into a [`WatcherEvent`]
//! 3. **Forwarding**: the resulting notification is handed to the consumer;
//!    the handler waits until the consumer has taken it
//! 4. **HTTP Response**: `200` once forwarded, `400` / `500` for decode
//!    failures, `503` when the forward is abandoned during shutdown
//!
//! # Key Components
//!
//! - **Decode**: route and body validation with HTTP-classified failures
//! - **Routes**: the versioned warp route table
//! - **Handler**: decode, forward, respond
//! - **Channel**: rendezvous handoff to the consumer
//! - **Server**: lifecycle bound to a cancellation token
//! - **Event Bus**: observability events and event logging
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use skr_listener::{EventSource, ListenerConfig, SkrEventsListener};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (listener, mut events) = SkrEventsListener::new(ListenerConfig::default())?;
//!
//!     tokio::spawn(async move {
//!         while let Some(notification) = events.next_event().await {
//!             println!("reconcile {}", notification);
//!         }
//!     });
//!
//!     let token = CancellationToken::new();
//!     listener.start(token).await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod handler;
pub mod routes;
pub mod server;
pub mod watcher_event;

pub use channel::{event_channel, DispatchError, EventReceiver, EventSender, EventSource};
pub use config::ListenerConfig;
pub use decode::{DecodeError, RouteParams};
pub use error::{Error, Result};
pub use server::{spawn_listener, Runnable, SkrEventsListener};
pub use watcher_event::{ChangeNotification, WatcherEvent};
