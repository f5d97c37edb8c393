//! Error handling for the SKR events listener.
//!
//! Request-level failures (decode and dispatch) never leave the endpoint: they
//! are turned into HTTP responses by [`crate::decode::DecodeError`] and
//! [`crate::channel::DispatchError`]. The [`Error`] type here covers what the
//! listener reports to its caller: configuration and shutdown.

use crate::channel::DispatchError;
use crate::decode::DecodeError;
use thiserror::Error;
use warp::http::StatusCode;
use warp::Reply;

/// Result type for skr-listener operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the SKR events listener.
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound request could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Decoded event could not be handed to the consumer.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Graceful shutdown did not complete cleanly.
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the HTTP status code that should be used for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Decode(e) => e.status_code(),
            Error::Dispatch(_) | Error::Shutdown(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Json(_) | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Creates a plain-text error response for this error.
    ///
    /// Decode and dispatch failures are answered with their bare message so
    /// that watchers see exactly the text the contract promises.
    pub fn to_response(&self) -> warp::reply::Response {
        let message = match self {
            Error::Decode(e) => e.message(),
            Error::Dispatch(e) => e.to_string(),
            other => other.to_string(),
        };
        warp::reply::with_status(message, self.status_code()).into_response()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}
