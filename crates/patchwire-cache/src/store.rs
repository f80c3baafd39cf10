//! Committed payloads and merged result trees, keyed by operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use patchwire_payload::{apply_payload, GraphQLError, MergeError, PathKey, Payload};
use serde_json::Value;

use crate::key::OperationKey;

/// The merged state of one operation.
///
/// Readers get an `Arc` snapshot; later payloads copy the tree on write
/// rather than mutating what a reader holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTree {
    pub data: Value,
    /// Errors from every payload so far, in wire order.
    pub errors: Vec<GraphQLError>,
    /// `hasNext` of the latest payload.
    pub has_next: bool,
    /// Number of payloads merged.
    pub payloads: usize,
}

#[derive(Debug, Default)]
struct OperationEntry {
    payloads: HashMap<PathKey, Arc<Payload>>,
    tree: Arc<ResultTree>,
}

/// In-memory store shared by a cache and its channels.
///
/// Each operation's entries are written only by the channel that owns it.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: Mutex<HashMap<OperationKey, OperationEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last payload delivered at `path` for `operation`.
    pub fn get(&self, operation: &OperationKey, path: &PathKey) -> Option<Arc<Payload>> {
        self.lock()
            .get(operation)
            .and_then(|entry| entry.payloads.get(path).cloned())
    }

    /// Snapshot of the merged tree for `operation`.
    pub fn tree(&self, operation: &OperationKey) -> Option<Arc<ResultTree>> {
        self.lock()
            .get(operation)
            .map(|entry| Arc::clone(&entry.tree))
    }

    /// Payload at `path` together with the tree it was merged into, read
    /// under one lock.
    pub fn read(
        &self,
        operation: &OperationKey,
        path: &PathKey,
    ) -> Option<(Arc<Payload>, Arc<ResultTree>)> {
        let entries = self.lock();
        let entry = entries.get(operation)?;
        let payload = entry.payloads.get(path)?;
        Some((Arc::clone(payload), Arc::clone(&entry.tree)))
    }

    /// Merge `payload` into the operation's tree and record it at its path.
    ///
    /// On error nothing is recorded at the payload's path.
    pub(crate) fn commit(
        &self,
        operation: &OperationKey,
        payload: &Arc<Payload>,
    ) -> Result<Arc<ResultTree>, MergeError> {
        let mut entries = self.lock();
        let entry = entries.entry(operation.clone()).or_default();

        let tree = Arc::make_mut(&mut entry.tree);
        apply_payload(&mut tree.data, payload)?;
        tree.errors.extend(payload.errors().iter().cloned());
        tree.has_next = payload.has_next();
        tree.payloads += 1;
        entry.payloads.insert(payload.path_key(), Arc::clone(payload));
        Ok(Arc::clone(&entry.tree))
    }

    /// Drop everything recorded for `operation`.
    pub fn evict(&self, operation: &OperationKey) -> bool {
        self.lock().remove(operation).is_some()
    }

    /// Number of paths with a recorded payload for `operation`.
    pub fn entry_count(&self, operation: &OperationKey) -> usize {
        self.lock()
            .get(operation)
            .map_or(0, |entry| entry.payloads.len())
    }

    /// Number of operations with recorded state.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationKey, OperationEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
