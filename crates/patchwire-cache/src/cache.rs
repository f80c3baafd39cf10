//! The result cache: one entry point for reading operation results.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use patchwire_payload::{lookup, GraphQLError, Path, Payload};
use patchwire_transport::{OperationRequest, Transport};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::channel::{Delivery, Lifecycle, LifecycleHook, OperationChannel, Phase, SubscriberId, Update};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::key::{FragmentRef, OperationKey};
use crate::read::{PendingRead, ReadResult, SubscriptionGuard};
use crate::store::{CacheStore, ResultTree};

/// The merged result of an operation at read time.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub operation: OperationKey,
    tree: Arc<ResultTree>,
}

impl QueryResult {
    pub fn data(&self) -> &Value {
        &self.tree.data
    }

    pub fn errors(&self) -> &[GraphQLError] {
        &self.tree.errors
    }

    /// Whether more payloads were announced when this snapshot was taken.
    pub fn has_next(&self) -> bool {
        self.tree.has_next
    }

    pub fn tree(&self) -> &Arc<ResultTree> {
        &self.tree
    }
}

/// The payload last delivered at a fragment's path, with the merged tree.
#[derive(Debug, Clone)]
pub struct FragmentResult {
    pub fragment: FragmentRef,
    pub payload: Arc<Payload>,
    tree: Arc<ResultTree>,
}

impl FragmentResult {
    /// The merged subtree at the fragment's path.
    pub fn data(&self) -> Option<&Value> {
        lookup(&self.tree.data, &self.fragment.path)
    }

    pub fn tree(&self) -> &Arc<ResultTree> {
        &self.tree
    }
}

#[derive(Default)]
struct Registry {
    live: HashMap<OperationKey, Arc<OperationChannel>>,
    settled: HashMap<OperationKey, Arc<OperationChannel>>,
}

impl Registry {
    fn channel(&self, operation: &OperationKey) -> Option<Arc<OperationChannel>> {
        self.live
            .get(operation)
            .or_else(|| self.settled.get(operation))
            .cloned()
    }
}

struct CacheInner {
    transport: Arc<dyn Transport>,
    config: CacheConfig,
    store: Arc<CacheStore>,
    registry: Mutex<Registry>,
}

impl CacheInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a finished or disposed channel out of the live set.
    fn retire(&self, channel: &OperationChannel, event: Lifecycle) {
        let mut registry = self.registry();
        let key = channel.key();
        let current = registry
            .live
            .get(key)
            .is_some_and(|live| std::ptr::eq(Arc::as_ptr(live), channel));
        if !current {
            return;
        }
        if let Some(channel) = registry.live.remove(key) {
            debug!(operation = key.short(), ?event, "operation left live set");
            registry.settled.insert(key.clone(), channel);
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        let registry = self
            .registry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for channel in registry.live.values() {
            channel.dispose();
        }
    }
}

/// Client-side cache of operation results.
///
/// Concurrent reads of the same operation share one transport call. Reads
/// return committed data immediately when present and a [`PendingRead`]
/// otherwise. Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    pub fn new(transport: Arc<dyn Transport>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                transport,
                config,
                store: Arc::new(CacheStore::new()),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Identity of an operation.
    pub fn operation_key(query: &str, variables: Option<&Value>) -> OperationKey {
        OperationKey::new(query, variables)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    /// Read the result of `query` with `variables`, starting the operation
    /// if nothing is cached or in flight for it.
    pub fn query(&self, query: &str, variables: Option<Value>) -> ReadResult<QueryResult> {
        let mut request = OperationRequest::new(query);
        if let Some(variables) = variables {
            request = request.with_variables(variables);
        }
        self.execute(request)
    }

    /// [`query`](Self::query) for a prepared request.
    pub fn execute(&self, request: OperationRequest) -> ReadResult<QueryResult> {
        let operation = OperationKey::new(&request.query, request.variables.as_ref());
        let inner = &self.inner;

        let (channel, created) = {
            let mut registry = inner.registry();

            // Committed roots outlive their channel, disposed or not.
            if let Some(result) = self.read_query(&operation) {
                return ReadResult::Ready(result);
            }

            match registry.live.get(&operation) {
                Some(channel) if !channel.is_terminal() => (Arc::clone(channel), false),
                _ => {
                    if tokio::runtime::Handle::try_current().is_err() {
                        return ReadResult::Failed(CacheError::NoRuntime);
                    }
                    let channel = Arc::new(
                        OperationChannel::new(request, Arc::clone(&inner.store))
                            .with_dispose_when_idle(inner.config.dispose_when_idle)
                            .with_hook(self.lifecycle_hook()),
                    );
                    if let Some(previous) = registry.settled.remove(&operation) {
                        debug!(
                            operation = operation.short(),
                            phase = %previous.phase(),
                            "replacing settled operation"
                        );
                    }
                    inner.store.evict(&operation);
                    registry.live.insert(operation.clone(), Arc::clone(&channel));
                    (channel, true)
                }
            }
        };

        let read = self.read(&channel, &Path::root(), {
            let operation = operation.clone();
            move |update: Update| QueryResult {
                operation,
                tree: update.tree,
            }
        });
        if created {
            if let Err(err) = channel.start(Arc::clone(&inner.transport)) {
                return ReadResult::Failed(err);
            }
        } else {
            debug!(operation = operation.short(), "attached to live operation");
        }
        read
    }

    /// Read the payload at a sub-path of an operation that has been started.
    pub fn fragment(&self, fragment: &FragmentRef) -> ReadResult<FragmentResult> {
        if let Some(result) = self.read_fragment(fragment) {
            return ReadResult::Ready(result);
        }
        let Some(channel) = self.inner.registry().channel(&fragment.operation) else {
            return ReadResult::Failed(CacheError::Precondition(format!(
                "no operation {} has been started",
                fragment.operation
            )));
        };

        self.read(&channel, &fragment.path, {
            let fragment = fragment.clone();
            move |update: Update| FragmentResult {
                fragment,
                payload: update.payload,
                tree: update.tree,
            }
        })
    }

    /// Committed root result, without starting anything.
    pub fn read_query(&self, operation: &OperationKey) -> Option<QueryResult> {
        let (_, tree) = self.inner.store.read(operation, &Path::root().key())?;
        Some(QueryResult {
            operation: operation.clone(),
            tree,
        })
    }

    /// Committed fragment payload, without waiting.
    pub fn read_fragment(&self, fragment: &FragmentRef) -> Option<FragmentResult> {
        let (payload, tree) = self
            .inner
            .store
            .read(&fragment.operation, &fragment.path.key())?;
        Some(FragmentResult {
            fragment: fragment.clone(),
            payload,
            tree,
        })
    }

    /// Call `callback` for each future payload at `path` of `operation`.
    pub fn listen<F>(&self, operation: &OperationKey, path: &Path, callback: F) -> Result<SubscriberId>
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        Ok(self.channel(operation)?.add_listener(path, callback))
    }

    /// Call `callback` for each future payload of `operation`, at any path.
    pub fn watch<F>(&self, operation: &OperationKey, callback: F) -> Result<SubscriberId>
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        Ok(self.channel(operation)?.watch(callback))
    }

    /// Remove a listener added with [`listen`](Self::listen).
    pub fn unlisten(&self, operation: &OperationKey, path: &Path, id: SubscriberId) -> bool {
        let channel = self.inner.registry().channel(operation);
        channel.is_some_and(|channel| channel.remove_listener(path, id))
    }

    /// Remove a subscriber added with [`watch`](Self::watch) or
    /// [`listen`](Self::listen).
    pub fn unwatch(&self, operation: &OperationKey, id: SubscriberId) -> bool {
        let channel = self.inner.registry().channel(operation);
        channel.is_some_and(|channel| channel.unsubscribe(id))
    }

    /// Wait until `operation` completes, fails, or is disposed.
    pub async fn settled(&self, operation: &OperationKey) -> Result<Phase> {
        let channel = self.channel(operation)?;
        Ok(channel.settled().await)
    }

    /// Cancel an in-flight operation.
    pub fn dispose(&self, operation: &OperationKey) -> bool {
        let channel = self.inner.registry().live.get(operation).cloned();
        channel.is_some_and(|channel| channel.dispose())
    }

    /// Number of operations currently in flight.
    pub fn live_operations(&self) -> usize {
        self.inner
            .registry()
            .live
            .values()
            .filter(|channel| !channel.is_terminal())
            .count()
    }

    /// Phase of the most recent channel for `operation`.
    pub fn operation_state(&self, operation: &OperationKey) -> Option<Phase> {
        self.inner
            .registry()
            .channel(operation)
            .map(|channel| channel.phase())
    }

    fn channel(&self, operation: &OperationKey) -> Result<Arc<OperationChannel>> {
        self.inner.registry().channel(operation).ok_or_else(|| {
            CacheError::Precondition(format!("no operation {operation} has been started"))
        })
    }

    /// One-shot read at `path`. Outcomes the channel already knows come
    /// back as `Ready` or `Failed`; only a real wait is `Pending`.
    fn read<T, F>(&self, channel: &Arc<OperationChannel>, path: &Path, finish: F) -> ReadResult<T>
    where
        F: FnOnce(Update) -> T + Send + 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        let subscribed = channel.once(path, move |delivery| {
            let _ = tx.send(delivery);
        });
        let Some(id) = subscribed else {
            return match rx.try_recv() {
                Ok(Ok(update)) => ReadResult::Ready(finish(update)),
                Ok(Err(err)) => ReadResult::Failed(err),
                Err(_) => ReadResult::Failed(CacheError::Disposed(channel.key().clone())),
            };
        };

        let guard = SubscriptionGuard::new(Arc::clone(channel), id);
        let pending = PendingRead::new(channel.key().clone(), rx, Box::new(finish), guard);
        match self.inner.config.read_timeout {
            Some(timeout) => ReadResult::Pending(pending.with_timeout(timeout)),
            None => ReadResult::Pending(pending),
        }
    }

    fn lifecycle_hook(&self) -> LifecycleHook {
        let inner: Weak<CacheInner> = Arc::downgrade(&self.inner);
        Arc::new(move |channel: &OperationChannel, event: Lifecycle| {
            if let Some(inner) = inner.upgrade() {
                inner.retire(channel, event);
            }
        })
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.inner.config)
            .field("operations", &self.inner.store.len())
            .field("live", &self.live_operations())
            .finish()
    }
}
