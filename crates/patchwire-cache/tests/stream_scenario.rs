//! A streamed list delivered over real multipart framing, split into
//! awkward chunks, and drained through the cache.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt};
use patchwire_cache::{CacheConfig, CacheError, FragmentRef, Phase, ReadResult, ResultCache};
use patchwire_frame::{decode_stream, encode_stream};
use patchwire_payload::path;
use patchwire_transport::{
    payloads_from_parts, OperationRequest, Transport, TransportResponse,
};
use serde_json::{json, Value};

const QUERY: &str = "{ items @stream(initialCount: 1) { id } }";

/// Frames a fixed payload list as multipart and decodes it again, handing
/// the decoder chunks of `chunk` bytes.
struct MultipartReplay {
    payloads: Vec<Value>,
    chunk: usize,
}

impl Transport for MultipartReplay {
    fn execute(
        &self,
        _request: OperationRequest,
    ) -> BoxFuture<'static, patchwire_transport::Result<TransportResponse>> {
        let payloads = self.payloads.clone();
        let chunk = self.chunk;
        async move {
            let framed: Vec<_> = encode_stream(stream::iter(payloads), "-")?.collect().await;
            let mut body = Vec::new();
            for part in framed {
                body.extend_from_slice(&part?);
            }
            let chunks: Vec<io::Result<Bytes>> = body
                .chunks(chunk)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let parts = decode_stream(stream::iter(chunks), "-")?;
            Ok(TransportResponse::Incremental(payloads_from_parts(parts)))
        }
        .boxed()
    }
}

fn four_items_by_path() -> Vec<Value> {
    vec![
        json!({"data": {"items": [{"id": 1}]}, "hasNext": true}),
        json!({"path": ["items", 1], "data": {"id": 2}, "hasNext": true}),
        json!({"path": ["items", 2], "data": {"id": 3}, "hasNext": true}),
        json!({"path": ["items", 3], "data": {"id": 4}, "hasNext": false}),
    ]
}

fn four_items_as_item_lists() -> Vec<Value> {
    vec![
        json!({"data": {"items": [{"id": 1}]}, "hasNext": true}),
        json!({"path": ["items", 1], "items": [{"id": 2}], "hasNext": true}),
        json!({"path": ["items", 2], "items": [{"id": 3}], "hasNext": true}),
        json!({"path": ["items", 3], "items": [{"id": 4}], "hasNext": false}),
    ]
}

async fn drain(payloads: Vec<Value>, chunk: usize) -> ResultCache {
    let cache = ResultCache::new(
        Arc::new(MultipartReplay { payloads, chunk }),
        CacheConfig::default(),
    );

    let first = cache.query(QUERY, None).resolve().await.unwrap();
    assert_eq!(first.data(), &json!({"items": [{"id": 1}]}));
    assert!(first.has_next());

    assert_eq!(cache.settled(&first.operation).await.unwrap(), Phase::Completed);
    cache
}

#[tokio::test]
async fn all_four_items_end_up_at_the_root() {
    for chunk in [1, 3, 7, 64, 4096] {
        let cache = drain(four_items_by_path(), chunk).await;
        let key = ResultCache::operation_key(QUERY, None);

        let full = cache.read_query(&key).unwrap();
        assert_eq!(
            full.data(),
            &json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]}),
            "chunk size {chunk}"
        );
        assert!(!full.has_next());
        assert_eq!(full.tree().payloads, 4);
        assert_eq!(cache.live_operations(), 0);
        assert_eq!(cache.operation_state(&key), Some(Phase::Completed));
    }
}

#[tokio::test]
async fn item_list_patches_merge_the_same_way() {
    let cache = drain(four_items_as_item_lists(), 5).await;
    let key = ResultCache::operation_key(QUERY, None);
    assert_eq!(
        cache.read_query(&key).unwrap().data(),
        &json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]})
    );
}

#[tokio::test]
async fn fragments_of_a_drained_operation_are_ready() {
    let cache = drain(four_items_by_path(), 11).await;
    let key = ResultCache::operation_key(QUERY, None);

    let fragment = cache
        .fragment(&FragmentRef::new(key.clone(), path!["items", 3]))
        .ready()
        .unwrap();
    assert_eq!(fragment.data(), Some(&json!({"id": 4})));
    assert!(!fragment.payload.has_next());

    // Completed without ever sending this path.
    let missing = cache.fragment(&FragmentRef::new(key, path!["items", 9]));
    assert!(matches!(
        missing,
        ReadResult::Failed(CacheError::PathNotDelivered { .. })
    ));
}

#[tokio::test]
async fn repeated_query_after_drain_is_ready() {
    let cache = drain(four_items_by_path(), 2).await;
    let again = cache.query(QUERY, None);
    assert!(again.is_ready());
    assert_eq!(again.ready().unwrap().data()["items"].as_array().unwrap().len(), 4);
}
