//! Transports that execute operations and return their results, either
//! whole or as an incremental stream of payloads.
//!
//! - [`Transport`]: the seam the result cache drives.
//! - [`HttpTransport`]: `POST` over HTTP, reading JSON or `multipart/mixed`
//!   (feature `http`, on by default).
//! - [`ScriptedTransport`]: replays prepared responses in-process.
//! - [`server`]: request parsing, error statuses, and response framing for
//!   servers that produce incremental results.

pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod request;
pub mod response;
pub mod scripted;
pub mod server;

pub use error::{Result, TransportError};
#[cfg(feature = "http")]
pub use http::{HttpTransport, HttpTransportConfig};
pub use request::OperationRequest;
pub use response::{payloads_from_parts, PayloadStream, Transport, TransportResponse};
pub use scripted::{feed, FeedSender, ScriptedResponse, ScriptedTransport};
pub use server::{
    incremental_response, parse_request_body, ErrorBody, IncrementalResponse, RequestError,
    INCREMENTAL_STATUS,
};
