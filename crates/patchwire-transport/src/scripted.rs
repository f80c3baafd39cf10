//! In-memory transport that replays prepared responses.
//!
//! Used by tests and by embedders that produce payloads in-process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use patchwire_payload::{ExecutionResult, Payload};
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::request::OperationRequest;
use crate::response::{Transport, TransportResponse};

/// One prepared response.
#[derive(Debug)]
pub enum ScriptedResponse {
    Single(ExecutionResult),
    /// A fixed incremental response, delivered all at once.
    Payloads(Vec<Payload>),
    /// An incremental response fed by a [`FeedSender`].
    Feed(mpsc::UnboundedReceiver<Result<Payload>>),
    /// Fail the request itself.
    Fail(String),
}

/// Producer side of a [`ScriptedResponse::Feed`].
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: mpsc::UnboundedSender<Result<Payload>>,
}

impl FeedSender {
    /// Deliver the next payload. Returns `false` once the consumer is gone.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        self.tx.send(Ok(payload.into())).is_ok()
    }

    /// Fail the stream mid-flight.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx
            .send(Err(TransportError::Closed(message.into())))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a live feed: the response goes into a [`ScriptedTransport`], the
/// sender stays with the test.
pub fn feed() -> (ScriptedResponse, FeedSender) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ScriptedResponse::Feed(rx), FeedSender { tx })
}

/// Replays queued responses, one per `execute` call, in order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<OperationRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: ScriptedResponse) -> Self {
        self.push(response);
        self
    }

    pub fn push(&self, response: ScriptedResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    /// Number of `execute` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<OperationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: OperationRequest) -> BoxFuture<'static, Result<TransportResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());

        let outcome = match next {
            None => Err(TransportError::Scripted("no scripted response left".into())),
            Some(ScriptedResponse::Fail(message)) => Err(TransportError::Scripted(message)),
            Some(ScriptedResponse::Single(result)) => Ok(TransportResponse::Single(result)),
            Some(ScriptedResponse::Payloads(payloads)) => Ok(TransportResponse::Incremental(
                stream::iter(payloads.into_iter().map(Ok)).boxed(),
            )),
            Some(ScriptedResponse::Feed(rx)) => Ok(TransportResponse::Incremental(
                stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })
                .boxed(),
            )),
        };
        async move { outcome }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use patchwire_payload::{path, Patch};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn replays_in_order_and_counts_calls() {
        let transport = ScriptedTransport::new()
            .with_response(ScriptedResponse::Single(ExecutionResult::from_data(json!({"a": 1}))))
            .with_response(ScriptedResponse::Fail("boom".into()));

        let first = transport.execute(OperationRequest::new("{ a }")).await.unwrap();
        assert!(!first.is_incremental());
        let second = transport.execute(OperationRequest::new("{ b }")).await;
        assert!(matches!(second, Err(TransportError::Scripted(m)) if m == "boom"));
        let third = transport.execute(OperationRequest::new("{ c }")).await;
        assert!(third.is_err());

        assert_eq!(transport.calls(), 3);
        let queries: Vec<_> = transport.requests().into_iter().map(|r| r.query).collect();
        assert_eq!(queries, ["{ a }", "{ b }", "{ c }"]);
    }

    #[tokio::test]
    async fn feed_delivers_until_sender_drops() {
        let (response, sender) = feed();
        let transport = ScriptedTransport::new().with_response(response);
        let mut stream = transport
            .execute(OperationRequest::new("{ a }"))
            .await
            .unwrap()
            .into_stream();

        assert!(sender.send(ExecutionResult::from_data(json!({"a": {}}))));
        assert!(sender.send(Patch::new(path!["a"], json!({"b": 1}), false)));
        drop(sender);

        assert!(matches!(stream.next().await, Some(Ok(Payload::Initial(_)))));
        assert!(matches!(stream.next().await, Some(Ok(Payload::Patch(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn feed_can_fail_mid_stream() {
        let (response, sender) = feed();
        let transport = ScriptedTransport::new().with_response(response);
        let mut stream = transport
            .execute(OperationRequest::new("{ a }"))
            .await
            .unwrap()
            .into_stream();
        sender.fail("connection reset");
        assert!(matches!(stream.next().await, Some(Err(TransportError::Closed(_)))));
    }
}
