use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchwire_cache::{
    CacheConfig, CacheError, FragmentRef, OperationKey, Phase, ReadResult, ResultCache,
};
use patchwire_payload::{path, ExecutionResult, GraphQLError, Patch};
use patchwire_transport::{feed, ScriptedResponse, ScriptedTransport, Transport};
use serde_json::json;

const QUERY: &str = "{ product(id: 1) { id ... @defer { price } } }";

fn cache_with(transport: &Arc<ScriptedTransport>, config: CacheConfig) -> ResultCache {
    ResultCache::new(Arc::clone(transport) as Arc<dyn Transport>, config)
}

fn initial(data: serde_json::Value) -> ExecutionResult {
    ExecutionResult {
        has_next: Some(true),
        ..ExecutionResult::from_data(data)
    }
}

#[tokio::test]
async fn concurrent_queries_share_one_transport_call() {
    let (response, sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let first = cache.query(QUERY, Some(json!({"n": 1, "m": 2})));
    let second = cache.query(QUERY, Some(json!({"m": 2, "n": 1})));
    assert!(first.is_pending());
    assert!(second.is_pending());
    assert_eq!(cache.live_operations(), 1);

    sender.send(initial(json!({"product": {"id": 1}})));
    let (a, b) = tokio::join!(first.resolve(), second.resolve());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.data(), b.data());
    assert_eq!(a.operation, b.operation);
    assert_eq!(transport.calls(), 1);

    sender.send(Patch::new(path!["product"], json!({"price": 500}), false));
    drop(sender);
    assert_eq!(cache.settled(&a.operation).await.unwrap(), Phase::Completed);

    let third = cache.query(QUERY, Some(json!({"n": 1, "m": 2})));
    assert!(third.is_ready());
    assert_eq!(
        third.ready().unwrap().data(),
        &json!({"product": {"id": 1, "price": 500}})
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn single_result_completes_the_operation() {
    let transport = Arc::new(ScriptedTransport::new().with_response(ScriptedResponse::Single(
        ExecutionResult::from_data(json!({"ok": true})),
    )));
    let cache = cache_with(&transport, CacheConfig::default());

    let result = cache.query("{ ok }", None).resolve().await.unwrap();
    assert_eq!(result.data(), &json!({"ok": true}));
    assert!(!result.has_next());
    assert_eq!(cache.settled(&result.operation).await.unwrap(), Phase::Completed);
    assert_eq!(transport.requests()[0].query, "{ ok }");
}

#[tokio::test]
async fn fragment_of_unknown_operation_is_a_precondition_failure() {
    let transport = Arc::new(ScriptedTransport::new());
    let cache = cache_with(&transport, CacheConfig::default());
    let fragment = FragmentRef::new(OperationKey::new("{ nope }", None), path!["a"]);
    assert!(matches!(
        cache.fragment(&fragment),
        ReadResult::Failed(CacheError::Precondition(_))
    ));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn fragment_waits_for_its_patch() {
    let (response, sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let root = cache.query(QUERY, None);
    let key = ResultCache::operation_key(QUERY, None);
    let fragment = cache.fragment(&FragmentRef::new(key, path!["product"]));
    assert!(fragment.is_pending());

    sender.send(initial(json!({"product": {"id": 1}})));
    sender.send(Patch::new(path!["product"], json!({"price": 500}), false).with_label("price"));

    let fragment = fragment.resolve().await.unwrap();
    assert_eq!(fragment.data(), Some(&json!({"id": 1, "price": 500})));
    assert_eq!(fragment.payload.label(), Some("price"));
    assert_eq!(root.resolve().await.unwrap().data(), &json!({"product": {"id": 1}}));
}

#[tokio::test]
async fn transport_failure_rejects_pending_reads_only_for_that_operation() {
    let (failing, failing_sender) = feed();
    let (healthy, healthy_sender) = feed();
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_response(failing)
            .with_response(healthy),
    );
    let cache = cache_with(&transport, CacheConfig::default());

    // Scripted responses are handed out in call order.
    let doomed = cache.query("{ a }", None);
    while transport.calls() < 1 {
        tokio::task::yield_now().await;
    }
    let fine = cache.query("{ b }", None);

    failing_sender.fail("connection reset");
    let err = doomed.resolve().await.unwrap_err();
    assert!(matches!(err, CacheError::Transport { .. }));
    assert!(err.to_string().contains("connection reset"));

    healthy_sender.send(ExecutionResult::from_data(json!({"b": 2})));
    assert_eq!(fine.resolve().await.unwrap().data(), &json!({"b": 2}));

    let a = ResultCache::operation_key("{ a }", None);
    assert_eq!(cache.operation_state(&a), Some(Phase::Errored));
}

#[tokio::test]
async fn timeout_fails_the_read_and_disposes_the_idle_operation() {
    let (stalled, _sender) = feed();
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_response(stalled)
            .with_response(ScriptedResponse::Single(ExecutionResult::from_data(json!({"late": 1})))),
    );
    let cache = cache_with(&transport, CacheConfig::default());

    let err = cache
        .query("{ late }", None)
        .with_timeout(Duration::from_millis(30))
        .resolve()
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Timeout(_)));

    let key = ResultCache::operation_key("{ late }", None);
    assert_eq!(cache.operation_state(&key), Some(Phase::Disposed));
    assert_eq!(cache.live_operations(), 0);

    // Querying again starts a fresh operation.
    let retry = cache.query("{ late }", None).resolve().await.unwrap();
    assert_eq!(retry.data(), &json!({"late": 1}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn committed_root_survives_idle_disposal() {
    let (response, sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let pending = cache.query(QUERY, None);
    sender.send(initial(json!({"product": {"id": 1}})));
    let root = pending.resolve().await.unwrap();

    // The deferred patch never comes; giving up on it leaves no subscribers.
    let price = cache.fragment(&FragmentRef::new(root.operation.clone(), path!["product"]));
    assert!(price.is_pending());
    drop(price);
    assert_eq!(cache.operation_state(&root.operation), Some(Phase::Disposed));

    let again = cache.query(QUERY, None);
    assert!(again.is_ready());
    assert_eq!(again.ready().unwrap().data(), &json!({"product": {"id": 1}}));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn fragments_of_a_failed_operation_fail_without_waiting() {
    let (response, sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let root = cache.query(QUERY, None);
    sender.fail("upstream unavailable");
    assert!(root.resolve().await.is_err());

    let key = ResultCache::operation_key(QUERY, None);
    assert_eq!(cache.operation_state(&key), Some(Phase::Errored));
    match cache.fragment(&FragmentRef::new(key, path!["product"])) {
        ReadResult::Failed(CacheError::Transport { source, .. }) => {
            assert!(source.to_string().contains("upstream unavailable"));
        }
        other => panic!("expected failed read, got {other:?}"),
    }
}

#[tokio::test]
async fn fragments_of_a_disposed_operation_fail_without_waiting() {
    let (response, _sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let pending = cache.query(QUERY, None);
    let key = ResultCache::operation_key(QUERY, None);
    assert!(cache.dispose(&key));
    drop(pending);

    let fragment = cache.fragment(&FragmentRef::new(key, path!["product"]));
    assert!(fragment.is_failed());
    assert!(matches!(fragment.resolve().await, Err(CacheError::Disposed(_))));
}

#[tokio::test]
async fn configured_read_timeout_applies_to_pending_reads() {
    let (stalled, _sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(stalled));
    let config = CacheConfig::default().with_read_timeout(Duration::from_millis(20));
    let cache = cache_with(&transport, config);

    match cache.query("{ slow }", None) {
        ReadResult::Pending(pending) => {
            assert_eq!(pending.timeout(), Some(Duration::from_millis(20)));
            assert!(matches!(pending.await, Err(CacheError::Timeout(_))));
        }
        other => panic!("expected pending read, got {other:?}"),
    }
}

#[tokio::test]
async fn dropping_one_of_two_readers_keeps_the_operation_alive() {
    let (response, sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let kept = cache.query(QUERY, None);
    let dropped = cache.query(QUERY, None);
    drop(dropped);

    let key = ResultCache::operation_key(QUERY, None);
    assert!(!cache.operation_state(&key).unwrap().is_terminal());

    sender.send(ExecutionResult::from_data(json!({"product": null})));
    assert_eq!(kept.resolve().await.unwrap().data(), &json!({"product": null}));
}

#[tokio::test]
async fn idle_disposal_can_be_turned_off() {
    let (response, sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default().with_dispose_when_idle(false));

    drop(cache.query(QUERY, None));
    let key = ResultCache::operation_key(QUERY, None);
    assert!(!cache.operation_state(&key).unwrap().is_terminal());

    sender.send(ExecutionResult::from_data(json!({"product": {"id": 1}})));
    drop(sender);
    assert_eq!(cache.settled(&key).await.unwrap(), Phase::Completed);
    assert!(cache.read_query(&key).is_some());
}

#[tokio::test]
async fn listeners_follow_one_path_until_removed() {
    let (response, sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let root = cache.query(QUERY, None);
    let key = ResultCache::operation_key(QUERY, None);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = cache
        .listen(&key, &path!["product"], move |delivery| {
            if let Ok(update) = delivery {
                sink.lock().unwrap().push(update.tree.data.clone());
            }
        })
        .unwrap();

    sender.send(initial(json!({"product": {"id": 1}})));
    root.resolve().await.unwrap();
    sender.send(Patch::new(path!["product"], json!({"price": 1}), true));
    sender.send(Patch::new(path!["product"], json!({"price": 2}), false));
    drop(sender);
    cache.settled(&key).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            json!({"product": {"id": 1, "price": 1}}),
            json!({"product": {"id": 1, "price": 2}}),
        ]
    );
    assert!(!cache.unlisten(&key, &path!["product"], id));

    let unknown = OperationKey::new("{ other }", None);
    assert!(matches!(
        cache.listen(&unknown, &path!["x"], |_| {}),
        Err(CacheError::Precondition(_))
    ));
}

#[tokio::test]
async fn errors_from_every_payload_accumulate() {
    let transport = Arc::new(ScriptedTransport::new().with_response(ScriptedResponse::Payloads(vec![
        ExecutionResult {
            errors: vec![GraphQLError::new("first")],
            ..initial(json!({"product": {"id": 1}}))
        }
        .into(),
        Patch {
            errors: vec![GraphQLError::new("second")],
            ..Patch::new(path!["product"], json!({"price": null}), false)
        }
        .into(),
    ])));
    let cache = cache_with(&transport, CacheConfig::default());

    let key = cache.query(QUERY, None).resolve().await.unwrap().operation;
    cache.settled(&key).await.unwrap();
    let full = cache.read_query(&key).unwrap();
    let messages: Vec<_> = full.errors().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["first", "second"]);
}

#[tokio::test]
async fn explicit_dispose_rejects_waiting_readers() {
    let (response, _sender) = feed();
    let transport = Arc::new(ScriptedTransport::new().with_response(response));
    let cache = cache_with(&transport, CacheConfig::default());

    let pending = cache.query(QUERY, None);
    let key = ResultCache::operation_key(QUERY, None);
    assert!(cache.dispose(&key));
    assert!(matches!(pending.resolve().await, Err(CacheError::Disposed(_))));
    assert!(!cache.dispose(&key));
}

#[test]
fn query_outside_a_runtime_fails_cleanly() {
    let transport = Arc::new(ScriptedTransport::new());
    let cache = cache_with(&transport, CacheConfig::default());
    assert!(matches!(
        cache.query("{ a }", None),
        ReadResult::Failed(CacheError::NoRuntime)
    ));
    assert_eq!(cache.live_operations(), 0);
}
