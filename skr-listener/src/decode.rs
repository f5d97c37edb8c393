//! Decoding of inbound watcher requests.
//!
//! The decoder turns the route parameters and the raw request body into a
//! [`ChangeNotification`]. Each step short-circuits on failure, and every
//! failure carries the HTTP status the endpoint should answer with:
//!
//! 1. the contract version must be present in the path (`400`)
//! 2. the contract version must not be empty (`400`)
//! 3. the body must be readable and within the size limit (`500` / `413`)
//! 4. the body must decode as a [`WatcherEvent`] (`500`)
//!
//! The body is only touched once the route parameters have been validated.

use crate::watcher_event::{ChangeNotification, WatcherEvent};
use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use thiserror::Error;
use tracing::debug;
use warp::http::StatusCode;
use warp::Reply;

/// Prefix of the path segment carrying the contract version (`v1`, `v2`, ...).
pub const VERSION_PREFIX: char = 'v';

/// Parameters extracted from the matched route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParams {
    /// Raw path segment expected to carry the contract version, e.g. `v1`.
    pub version_segment: Option<String>,

    /// Component discriminator from the path.
    pub component: String,
}

impl RouteParams {
    /// Creates route parameters from a matched version segment and component.
    pub fn new(version_segment: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            version_segment: Some(version_segment.into()),
            component: component.into(),
        }
    }

    /// Returns the contract version carried by the version segment.
    ///
    /// `None` means the segment is absent or does not start with `v`.
    pub fn contract_version(&self) -> Option<&str> {
        self.version_segment
            .as_deref()
            .and_then(|segment| segment.strip_prefix(VERSION_PREFIX))
    }
}

/// A failed decode, classified by the HTTP status it maps to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No contract version could be extracted from the path.
    #[error("contract version could not be parsed")]
    VersionUnparsable,

    /// The contract version segment was present but empty.
    #[error("contract version cannot be empty")]
    VersionEmpty,

    /// The request body could not be read from the connection.
    #[error("could not read request body")]
    BodyRead,

    /// The request body grew beyond the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// The body is not a structurally valid watcher event.
    #[error("could not unmarshal watcher event")]
    Unmarshal,
}

impl DecodeError {
    /// Returns the HTTP status code that should be used for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DecodeError::VersionUnparsable | DecodeError::VersionEmpty => StatusCode::BAD_REQUEST,
            DecodeError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DecodeError::BodyRead | DecodeError::Unmarshal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message written verbatim as the response body.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Short machine-readable name used in observability events.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::VersionUnparsable | DecodeError::VersionEmpty => "routing_error",
            DecodeError::BodyRead | DecodeError::BodyTooLarge { .. } => "body_read_error",
            DecodeError::Unmarshal => "decode_error",
        }
    }

    /// Creates a plain-text response for this failure.
    pub fn to_response(&self) -> warp::reply::Response {
        warp::reply::with_status(self.message(), self.status_code()).into_response()
    }
}

/// Decodes a watcher request into a change notification.
///
/// The body is consumed chunk by chunk so that oversized payloads are rejected
/// without buffering them completely.
pub async fn decode_watcher_event<S, B, E>(
    params: &RouteParams,
    body: S,
    max_body_bytes: usize,
) -> Result<ChangeNotification, DecodeError>
where
    S: Stream<Item = Result<B, E>>,
    B: Buf,
    E: Display,
{
    validate_contract_version(params)?;

    let raw = read_body(body, max_body_bytes).await?;

    // A `null` body decodes like an empty object.
    let event = serde_json::from_slice::<Option<WatcherEvent>>(&raw)
        .map_err(|e| {
            debug!(error = %e, "watcher event body is not valid JSON");
            DecodeError::Unmarshal
        })?
        .unwrap_or_default();

    debug!(
        skr_cluster_id = %event.skr_cluster_id,
        component = %event.component,
        route_component = %params.component,
        "decoded watcher event"
    );

    Ok(ChangeNotification::from(event))
}

/// Checks that the route carries a non-empty contract version.
pub fn validate_contract_version(params: &RouteParams) -> Result<&str, DecodeError> {
    match params.contract_version() {
        None => Err(DecodeError::VersionUnparsable),
        Some("") => Err(DecodeError::VersionEmpty),
        Some(version) => Ok(version),
    }
}

async fn read_body<S, B, E>(body: S, max_body_bytes: usize) -> Result<BytesMut, DecodeError>
where
    S: Stream<Item = Result<B, E>>,
    B: Buf,
    E: Display,
{
    futures::pin_mut!(body);

    let mut raw = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let mut chunk = chunk.map_err(|e| {
            debug!(error = %e, "failed to read request body");
            DecodeError::BodyRead
        })?;

        if raw.len() + chunk.remaining() > max_body_bytes {
            return Err(DecodeError::BodyTooLarge {
                limit: max_body_bytes,
            });
        }

        while chunk.has_remaining() {
            let part = chunk.chunk();
            let len = part.len();
            raw.extend_from_slice(part);
            chunk.advance(len);
        }
    }

    Ok(raw)
}
