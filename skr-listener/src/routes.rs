//! Route table of the SKR events listener.
//!
//! Watchers post to `/v{version}/{component}/event`. The first segment must
//! start with `v`; an empty version (`/v/skr/event`) is left to the decoder,
//! which answers `400`. The component segment is either a configured literal
//! (`/v1/skr/event`) or, when no component is configured, any single segment. Only `POST` is routed; other methods and
//! unknown paths are rejected by the router itself.

use crate::decode::{RouteParams, VERSION_PREFIX};
use crate::handler::{handle_health_check, handle_watcher_event, HandlerContext};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::error;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Fixed last segment of every event route.
pub const EVENT_SEGMENT: &str = "event";

/// Path of the liveness endpoint.
pub const HEALTH_SEGMENT: &str = "healthz";

/// Builds the `POST /v{version}/{component}/event` route.
pub fn watcher_event_route(
    component: Option<String>,
    ctx: Arc<HandlerContext>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    version_segment()
        .and(component_segment(component))
        .and(warp::path(EVENT_SEGMENT))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::stream())
        .and(with_context(ctx))
        .and_then(
            |version_segment: String, component: String, body, ctx: Arc<HandlerContext>| async move {
                handle_watcher_event(RouteParams::new(version_segment, component), body, ctx).await
            },
        )
}

/// Builds the complete route table: events, health check and rejection handling.
pub fn listener_routes(
    component: Option<String>,
    ctx: Arc<HandlerContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health_route = warp::path(HEALTH_SEGMENT)
        .and(warp::path::end())
        .and(warp::get())
        .and_then(handle_health_check);

    watcher_event_route(component, ctx)
        .or(health_route)
        .with(warp::log("skr_listener"))
        .recover(handle_rejection)
}

fn version_segment() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::path::param::<String>().and_then(|segment: String| async move {
        if segment.starts_with(VERSION_PREFIX) {
            Ok(segment)
        } else {
            Err(warp::reject::not_found())
        }
    })
}

fn component_segment(component: Option<String>) -> BoxedFilter<(String,)> {
    match component {
        Some(name) => warp::path(name.clone())
            .map(move || name.clone())
            .boxed(),
        None => warp::path::param::<String>().boxed(),
    }
}

fn with_context(
    ctx: Arc<HandlerContext>,
) -> impl Filter<Extract = (Arc<HandlerContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// Maps router rejections to plain-text responses.
async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (message, status) = if err.is_not_found() {
        ("404 page not found", StatusCode::NOT_FOUND)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ("method not allowed", StatusCode::METHOD_NOT_ALLOWED)
    } else {
        error!("Unhandled rejection: {:?}", err);
        ("internal server error", StatusCode::INTERNAL_SERVER_ERROR)
    };

    Ok(warp::reply::with_status(message, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{event_channel, EventReceiver};
    use crate::event::EventBus;
    use crate::watcher_event::ChangeNotification;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn context() -> (Arc<HandlerContext>, EventReceiver) {
        let (sender, receiver) = event_channel();
        let ctx = HandlerContext {
            sender,
            event_bus: Arc::new(EventBus::new()),
            shutdown: CancellationToken::new(),
            max_body_bytes: 1024,
            dispatch_timeout: None,
        };
        (Arc::new(ctx), receiver)
    }

    #[tokio::test]
    async fn test_post_event_reaches_consumer() {
        let (ctx, mut receiver) = context();
        let routes = listener_routes(Some("skr".to_string()), ctx);

        let consumer = tokio::spawn(async move { receiver.recv().await });

        let response = warp::test::request()
            .method("POST")
            .path("/v1/skr/event")
            .json(&json!({
                "skrClusterID": "c1",
                "body": "watcher",
                "namespace": "ns1",
                "name": "res1"
            }))
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert_eq!(
            consumer.await.unwrap(),
            Some(ChangeNotification::new("ns1", "res1"))
        );
    }

    #[tokio::test]
    async fn test_empty_version_is_bad_request() {
        let (ctx, _receiver) = context();
        let routes = listener_routes(Some("skr".to_string()), ctx);

        let response = warp::test::request()
            .method("POST")
            .path("/v/skr/event")
            .body(r#"{"namespace":"ns1","name":"res1"}"#)
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body().as_ref(), b"contract version cannot be empty");
    }

    #[tokio::test]
    async fn test_segment_without_version_prefix_is_not_found() {
        let (ctx, mut receiver) = context();
        let routes = listener_routes(Some("skr".to_string()), ctx);

        for path in ["/latest/skr/event", "/foo/skr/event", "/1/skr/event"] {
            let response = warp::test::request()
                .method("POST")
                .path(path)
                .body(r#"{"namespace":"ns1","name":"res1"}"#)
                .reply(&routes)
                .await;

            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
            assert_eq!(response.body().as_ref(), b"404 page not found");
        }

        drop(routes);
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_unknown_component_is_not_found() {
        let (ctx, _receiver) = context();
        let routes = listener_routes(Some("skr".to_string()), ctx);

        let response = warp::test::request()
            .method("POST")
            .path("/v1/other/event")
            .body("{}")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parameterized_component_accepts_any_segment() {
        let (ctx, mut receiver) = context();
        let routes = listener_routes(None, ctx);

        let consumer = tokio::spawn(async move { receiver.recv().await });

        let response = warp::test::request()
            .method("POST")
            .path("/v2/lifecycle-manager/event")
            .body(r#"{"namespace":"kcp-system","name":"kyma-1"}"#)
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            consumer.await.unwrap(),
            Some(ChangeNotification::new("kcp-system", "kyma-1"))
        );
    }

    #[tokio::test]
    async fn test_get_on_event_route_is_method_not_allowed() {
        let (ctx, _receiver) = context();
        let routes = listener_routes(Some("skr".to_string()), ctx);

        let response = warp::test::request()
            .method("GET")
            .path("/v1/skr/event")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_health_route() {
        let (ctx, _receiver) = context();
        let routes = listener_routes(Some("skr".to_string()), ctx);

        let response = warp::test::request()
            .method("GET")
            .path("/healthz")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "ok");
    }
}
