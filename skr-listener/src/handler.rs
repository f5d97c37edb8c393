//! Request handlers for the SKR events listener.
//!
//! Every watcher request runs through the same three steps, in order:
//! decode the route and body, forward the resulting notification to the
//! consumer, and respond. The response is only written once the forward step
//! has finished, so `200 OK` means the consumer has the notification.

use crate::channel::EventSender;
use crate::decode::{decode_watcher_event, RouteParams};
use crate::error::Error;
use crate::event::EventBus;
use bytes::Buf;
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::reply::json;
use warp::Reply;

/// Shared state handed to every request.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Producer half of the event channel.
    pub sender: EventSender,

    /// Bus receiving observability events.
    pub event_bus: Arc<EventBus>,

    /// Fires when the listener shuts down; pending forwards give up.
    pub shutdown: CancellationToken,

    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,

    /// Upper bound on how long a forward may wait for the consumer.
    pub dispatch_timeout: Option<Duration>,
}

/// Response structure for health checks.
#[derive(Serialize)]
struct HealthResponse {
    /// Always "ok" when reachable
    status: String,
    /// Current version of the skr-listener package
    version: String,
}

/// Handler for health check requests.
pub async fn handle_health_check() -> std::result::Result<impl Reply, Infallible> {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    Ok(json(&response))
}

/// Handler for watcher events.
///
/// Decodes the request, forwards the notification and answers:
/// - `200` with an empty body once the consumer has taken the notification
/// - the decode failure's status and message when decoding fails
/// - `503` when the forward is abandoned (shutdown, timeout, consumer gone)
pub async fn handle_watcher_event<S, B, E>(
    params: RouteParams,
    body: S,
    ctx: Arc<HandlerContext>,
) -> std::result::Result<warp::reply::Response, Infallible>
where
    S: Stream<Item = Result<B, E>> + Send,
    B: Buf + Send,
    E: Display + Send,
{
    let start_time = Instant::now();
    let path = format!(
        "/{}/{}/event",
        params.version_segment.as_deref().unwrap_or_default(),
        params.component
    );

    info!(path = %path, "received event from SKR");
    ctx.event_bus
        .publish_request_received("POST".to_string(), path)
        .await;

    let notification = match decode_watcher_event(&params, body, ctx.max_body_bytes).await {
        Ok(notification) => notification,
        Err(e) => {
            error!(error = %e, status = e.status_code().as_u16(), "failed to decode watcher event");
            ctx.event_bus
                .publish_request_failed(e.kind().to_string(), e.message())
                .await;
            return Ok(respond(&ctx, Error::from(e).to_response(), start_time).await);
        }
    };

    let resource = notification.to_string();
    let namespace = notification.namespace.clone();
    let name = notification.name.clone();

    match ctx
        .sender
        .send_with_cancel(notification, &ctx.shutdown, ctx.dispatch_timeout)
        .await
    {
        Ok(()) => {
            info!(resource = %resource, "dispatched event object into channel");
            ctx.event_bus.publish_event_dispatched(namespace, name).await;

            let response = warp::reply::with_status(warp::reply(), StatusCode::OK).into_response();
            Ok(respond(&ctx, response, start_time).await)
        }
        Err(e) => {
            warn!(resource = %resource, error = %e, "event was not dispatched");
            ctx.event_bus
                .publish_request_failed("dispatch_error".to_string(), e.to_string())
                .await;
            Ok(respond(&ctx, Error::from(e).to_response(), start_time).await)
        }
    }
}

async fn respond(
    ctx: &HandlerContext,
    response: warp::reply::Response,
    start_time: Instant,
) -> warp::reply::Response {
    let duration_ms = start_time.elapsed().as_millis() as u64;
    ctx.event_bus
        .publish_response_sent(response.status(), duration_ms)
        .await;
    response
}
