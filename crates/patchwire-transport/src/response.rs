use std::fmt;

use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, StreamExt};
use patchwire_frame::{Part, PartBody};
use patchwire_payload::{ExecutionResult, Payload};
use tracing::warn;

use crate::error::{Result, TransportError};
use crate::request::OperationRequest;

/// Payloads of one incremental response, in wire order.
pub type PayloadStream = BoxStream<'static, Result<Payload>>;

/// What a transport hands back for one operation.
///
/// The transport declares the shape up front; callers never have to guess
/// whether more payloads will follow.
pub enum TransportResponse {
    /// A complete result with nothing deferred.
    Single(ExecutionResult),
    /// An initial result followed by patches.
    Incremental(PayloadStream),
}

impl TransportResponse {
    /// Flatten either shape into a payload stream.
    pub fn into_stream(self) -> PayloadStream {
        match self {
            TransportResponse::Single(result) => {
                futures_util::stream::once(async move { Ok(Payload::Initial(result)) }).boxed()
            }
            TransportResponse::Incremental(stream) => stream,
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self, TransportResponse::Incremental(_))
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportResponse::Single(result) => f.debug_tuple("Single").field(result).finish(),
            TransportResponse::Incremental(_) => f.write_str("Incremental(..)"),
        }
    }
}

/// Executes operations against some producer of results.
///
/// The returned future owns everything it needs, so a caller can move it
/// onto a background task.
pub trait Transport: Send + Sync {
    fn execute(&self, request: OperationRequest) -> BoxFuture<'static, Result<TransportResponse>>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn execute(&self, request: OperationRequest) -> BoxFuture<'static, Result<TransportResponse>> {
        (**self).execute(request)
    }
}

/// Turn decoded multipart parts into payloads.
///
/// Parts that are not JSON are skipped with a warning. A framing error or a
/// JSON part that is not a payload ends the stream with that error.
pub fn payloads_from_parts<S>(parts: S) -> PayloadStream
where
    S: futures_core::Stream<Item = patchwire_frame::Result<Part>> + Send + 'static,
{
    parts
        .filter_map(|part| async move {
            match part {
                Err(err) => Some(Err(TransportError::Frame(err))),
                Ok(part) => match part.body {
                    PartBody::Json(value) => Some(Payload::from_value(value).map_err(Into::into)),
                    PartBody::Text(text) => {
                        if !text.trim().is_empty() {
                            warn!(
                                content_type = part.headers.get("content-type").map(String::as_str),
                                bytes = text.len(),
                                "skipping non-JSON part"
                            );
                        }
                        None
                    }
                },
            }
        })
        .boxed()
}
