//! One operation in flight: drives its transport, commits each payload to
//! the store, and notifies subscribers.
//!
//! Per payload, merging, committing and selecting the subscribers to notify
//! happen under the channel lock; callbacks then run outside it, in wire
//! order, before the next payload is pulled from the transport.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use patchwire_payload::{Path, PathKey, Payload};
use patchwire_transport::{OperationRequest, Transport};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::key::OperationKey;
use crate::store::{CacheStore, ResultTree};

/// Lifecycle of a channel. `Completed`, `Errored` and `Disposed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Created,
    Started,
    Streaming,
    Completed,
    Errored,
    Disposed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Errored | Phase::Disposed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Started => "started",
            Phase::Streaming => "streaming",
            Phase::Completed => "completed",
            Phase::Errored => "errored",
            Phase::Disposed => "disposed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token identifying one registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A committed payload and the merged tree right after it.
#[derive(Debug, Clone)]
pub struct Update {
    pub payload: Arc<Payload>,
    pub tree: Arc<ResultTree>,
}

/// What a subscriber receives.
pub type Delivery = std::result::Result<Update, CacheError>;

/// Lifecycle events reported to the channel's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The transport completed or failed.
    Finished,
    /// The last interested subscriber went away and the channel was disposed.
    Idle,
}

/// Called on lifecycle events, outside the channel lock.
pub type LifecycleHook = Arc<dyn Fn(&OperationChannel, Lifecycle) + Send + Sync>;

type ListenerFn = Arc<dyn Fn(&Delivery) + Send + Sync>;
type OnceFn = Box<dyn FnOnce(Delivery) + Send>;

enum Callback {
    Listener(ListenerFn),
    Once(OnceFn),
}

impl Callback {
    fn invoke(self, delivery: Delivery) {
        match self {
            Callback::Listener(callback) => callback(&delivery),
            Callback::Once(callback) => callback(delivery),
        }
    }
}

enum Target {
    Path { key: PathKey, path: Path },
    Every,
}

impl Target {
    fn matches(&self, key: &PathKey) -> bool {
        match self {
            Target::Path { key: target, .. } => target == key,
            Target::Every => true,
        }
    }
}

struct Subscriber {
    id: SubscriberId,
    target: Target,
    callback: Callback,
}

struct ChannelState {
    phase: Phase,
    subscribers: Vec<Subscriber>,
    failure: Option<CacheError>,
    payloads: usize,
}

impl ChannelState {
    /// Collect callbacks for a payload at `key`, in registration order.
    /// One-shot subscribers are removed here.
    fn take_matching(&mut self, key: &PathKey) -> Vec<Callback> {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.subscribers.len() {
            if !self.subscribers[index].target.matches(key) {
                index += 1;
                continue;
            }
            match &self.subscribers[index].callback {
                Callback::Listener(callback) => {
                    due.push(Callback::Listener(Arc::clone(callback)));
                    index += 1;
                }
                Callback::Once(_) => due.push(self.subscribers.remove(index).callback),
            }
        }
        due
    }
}

/// The single live producer of results for one operation.
pub struct OperationChannel {
    key: OperationKey,
    request: OperationRequest,
    store: Arc<CacheStore>,
    dispose_when_idle: bool,
    hook: Option<LifecycleHook>,
    state: Mutex<ChannelState>,
    phase_tx: watch::Sender<Phase>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl OperationChannel {
    pub fn new(request: OperationRequest, store: Arc<CacheStore>) -> Self {
        let key = OperationKey::new(&request.query, request.variables.as_ref());
        let (phase_tx, _) = watch::channel(Phase::Created);
        Self {
            key,
            request,
            store,
            dispose_when_idle: true,
            hook: None,
            state: Mutex::new(ChannelState {
                phase: Phase::Created,
                subscribers: Vec::new(),
                failure: None,
                payloads: 0,
            }),
            phase_tx,
            cancel: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_hook(mut self, hook: LifecycleHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_dispose_when_idle(mut self, dispose: bool) -> Self {
        self.dispose_when_idle = dispose;
        self
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_state().subscribers.len()
    }

    pub fn payloads_received(&self) -> usize {
        self.lock_state().payloads
    }

    /// Spawn the task that runs the transport.
    ///
    /// Returns `Ok(false)` if the channel was already started.
    pub fn start(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<bool> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        {
            let mut state = self.lock_state();
            if state.phase != Phase::Created {
                return Ok(false);
            }
            state.phase = Phase::Started;
        }
        self.phase_tx.send_replace(Phase::Started);
        info!(operation = self.key.short(), "operation started");

        runtime.spawn(Arc::clone(self).run(transport));
        Ok(true)
    }

    /// Deliver the payload at `path` to `callback` exactly once.
    ///
    /// If the payload is already committed, or the channel has finished
    /// without it, `callback` runs before this returns and `None` is
    /// returned. Otherwise it is registered and fires on arrival.
    pub fn once<F>(&self, path: &Path, callback: F) -> Option<SubscriberId>
    where
        F: FnOnce(Delivery) + Send + 'static,
    {
        let key = path.key();
        let mut state = self.lock_state();

        if let Some((payload, tree)) = self.store.read(&self.key, &key) {
            drop(state);
            callback(Ok(Update { payload, tree }));
            return None;
        }
        if let Some(err) = self.terminal_error(&state, path) {
            drop(state);
            callback(Err(err));
            return None;
        }

        let id = self.next_id();
        state.subscribers.push(Subscriber {
            id,
            target: Target::Path {
                key,
                path: path.clone(),
            },
            callback: Callback::Once(Box::new(callback)),
        });
        Some(id)
    }

    /// Call `callback` for every future payload at `path`, and with the
    /// error if the transport fails.
    pub fn add_listener<F>(&self, path: &Path, callback: F) -> SubscriberId
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        self.register(
            Target::Path {
                key: path.key(),
                path: path.clone(),
            },
            callback,
        )
    }

    /// Like [`add_listener`](Self::add_listener) for payloads at any path.
    pub fn watch<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        self.register(Target::Every, callback)
    }

    /// Remove the subscriber `id` registered at `path`.
    pub fn remove_listener(&self, path: &Path, id: SubscriberId) -> bool {
        let key = path.key();
        self.withdraw(id, |target| match target {
            Target::Path { key: target, .. } => *target == key,
            Target::Every => false,
        })
    }

    /// Remove the subscriber `id` wherever it is registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.withdraw(id, |_| true)
    }

    /// Cancel the operation now. Pending subscribers receive
    /// [`CacheError::Disposed`]. Returns `false` if already finished.
    pub fn dispose(&self) -> bool {
        let pending = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return false;
            }
            state.phase = Phase::Disposed;
            mem::take(&mut state.subscribers)
        };
        self.finish_disposal();
        for subscriber in pending {
            subscriber
                .callback
                .invoke(Err(CacheError::Disposed(self.key.clone())));
        }
        true
    }

    /// Wait until the channel reaches a final phase.
    pub async fn settled(&self) -> Phase {
        let mut phases = self.phase_tx.subscribe();
        let settled = phases
            .wait_for(|phase| phase.is_terminal())
            .await
            .map(|phase| *phase);
        settled.unwrap_or_else(|_| self.phase())
    }

    async fn run(self: Arc<Self>, transport: Arc<dyn Transport>) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(operation = self.key.short(), "transport task cancelled");
                return;
            }
            outcome = self.pump(transport.as_ref()) => outcome,
        };
        match outcome {
            Ok(()) => self.complete(),
            Err(err) => self.fail(err),
        }
    }

    async fn pump(&self, transport: &dyn Transport) -> Result<()> {
        let response = transport
            .execute(self.request.clone())
            .await
            .map_err(|err| CacheError::transport(&self.key, err))?;
        debug!(
            operation = self.key.short(),
            incremental = response.is_incremental(),
            "transport responded"
        );

        let mut payloads = response.into_stream();
        while let Some(payload) = payloads.next().await {
            let payload = payload.map_err(|err| CacheError::transport(&self.key, err))?;
            self.deliver(payload)?;
        }
        Ok(())
    }

    fn deliver(&self, payload: Payload) -> Result<()> {
        let payload = Arc::new(payload);
        let key = payload.path_key();

        let (update, due, first) = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return Ok(());
            }
            let tree = self
                .store
                .commit(&self.key, &payload)
                .map_err(|source| CacheError::Merge {
                    operation: self.key.clone(),
                    source,
                })?;
            let first = state.phase != Phase::Streaming;
            state.phase = Phase::Streaming;
            state.payloads += 1;
            let due = state.take_matching(&key);
            (Update { payload, tree }, due, first)
        };

        if first {
            self.phase_tx.send_replace(Phase::Streaming);
        }
        debug!(
            operation = self.key.short(),
            path = %update.payload.path(),
            has_next = update.payload.has_next(),
            subscribers = due.len(),
            "payload committed"
        );
        for callback in due {
            callback.invoke(Ok(update.clone()));
        }
        Ok(())
    }

    fn complete(&self) {
        let (pending, payloads) = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = Phase::Completed;
            (mem::take(&mut state.subscribers), state.payloads)
        };
        self.phase_tx.send_replace(Phase::Completed);
        info!(operation = self.key.short(), payloads, "operation completed");
        self.fire(Lifecycle::Finished);

        for subscriber in pending {
            if let (Callback::Once(callback), Target::Path { path, .. }) =
                (subscriber.callback, subscriber.target)
            {
                callback(Err(CacheError::PathNotDelivered {
                    operation: self.key.clone(),
                    path,
                }));
            }
        }
    }

    fn fail(&self, err: CacheError) {
        let pending = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = Phase::Errored;
            state.failure = Some(err.clone());
            mem::take(&mut state.subscribers)
        };
        self.phase_tx.send_replace(Phase::Errored);
        warn!(operation = self.key.short(), error = %err, "operation failed");
        self.fire(Lifecycle::Finished);

        for subscriber in pending {
            subscriber.callback.invoke(Err(err.clone()));
        }
    }

    fn register<F>(&self, target: Target, callback: F) -> SubscriberId
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock_state().subscribers.push(Subscriber {
            id,
            target,
            callback: Callback::Listener(Arc::new(callback)),
        });
        id
    }

    /// Remove a subscriber that is no longer interested. Leaving no
    /// subscribers on a running channel disposes it.
    fn withdraw(&self, id: SubscriberId, at: impl Fn(&Target) -> bool) -> bool {
        let (removed, idle) = {
            let mut state = self.lock_state();
            let Some(index) = state
                .subscribers
                .iter()
                .position(|s| s.id == id && at(&s.target))
            else {
                return false;
            };
            let removed = state.subscribers.remove(index);
            let idle = self.dispose_when_idle
                && state.subscribers.is_empty()
                && !state.phase.is_terminal();
            if idle {
                state.phase = Phase::Disposed;
            }
            (removed, idle)
        };
        drop(removed);

        if idle {
            self.finish_disposal();
        }
        true
    }

    fn finish_disposal(&self) {
        self.cancel.cancel();
        self.phase_tx.send_replace(Phase::Disposed);
        info!(operation = self.key.short(), "operation disposed");
        self.fire(Lifecycle::Idle);
    }

    fn terminal_error(&self, state: &ChannelState, path: &Path) -> Option<CacheError> {
        match state.phase {
            Phase::Completed => Some(CacheError::PathNotDelivered {
                operation: self.key.clone(),
                path: path.clone(),
            }),
            Phase::Errored => state.failure.clone(),
            Phase::Disposed => Some(CacheError::Disposed(self.key.clone())),
            _ => None,
        }
    }

    fn fire(&self, event: Lifecycle) {
        if let Some(hook) = &self.hook {
            hook(self, event);
        }
    }

    fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for OperationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("OperationChannel")
            .field("key", &self.key)
            .field("phase", &state.phase)
            .field("subscribers", &state.subscribers.len())
            .field("payloads", &state.payloads)
            .finish()
    }
}
