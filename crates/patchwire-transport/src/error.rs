use std::time::Duration;

use patchwire_frame::FrameError;
use patchwire_payload::{GraphQLError, PayloadError};

/// Errors that can occur while executing an operation over a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body could not be read.
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// No response arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-success status.
    #[error(
        "server rejected request (status {status}): {}",
        .errors.first().map(|e| e.message.as_str()).unwrap_or("no error details")
    )]
    Rejected {
        status: u16,
        errors: Vec<GraphQLError>,
    },

    /// The response was neither JSON nor multipart.
    #[error("unsupported response content type {0:?}")]
    UnsupportedContentType(String),

    /// The multipart body was malformed.
    #[error("multipart error: {0}")]
    Frame(#[from] FrameError),

    /// A part did not hold a valid payload.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// A complete JSON response did not hold a valid result.
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),

    /// The producer went away before finishing.
    #[error("transport closed: {0}")]
    Closed(String),

    /// A scripted transport was asked for a response it does not have.
    #[error("scripted transport: {0}")]
    Scripted(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
