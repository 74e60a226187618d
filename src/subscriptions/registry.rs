//! Registry of live listeners and pollers.

use alloy::primitives::TxHash;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::session::SessionStore;

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    AccountsChanged,
    ChainChanged,
    NewBlockHeaders,
    TransferEvent,
    ReceiptPoll,
    /// Timer-driven balance refresh.
    BalancePoll,
}

/// Whom a subscription serves: the whole session or one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubscriptionScope {
    Session,
    Transaction(TxHash),
}

/// Registry key. At most one live handle per key per generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionKey {
    pub kind: SubscriptionKind,
    pub scope: SubscriptionScope,
}

impl SubscriptionKey {
    pub fn session(kind: SubscriptionKind) -> Self {
        Self {
            kind,
            scope: SubscriptionScope::Session,
        }
    }

    pub fn transaction(kind: SubscriptionKind, hash: TxHash) -> Self {
        Self {
            kind,
            scope: SubscriptionScope::Transaction(hash),
        }
    }
}

/// A cancellable listener or polling loop.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    pub id: Uuid,
    pub key: SubscriptionKey,
    pub generation: u64,
    abort: AbortHandle,
}

impl SubscriptionHandle {
    pub fn kind(&self) -> SubscriptionKind {
        self.key.kind
    }

    /// Stop the underlying task. Idempotent.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Tracks every live subscription so teardown can cancel them together.
///
/// Cancellation aborts the task at its next suspension point. A callback
/// already past that point is still harmless: each task re-checks its
/// generation before applying anything.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    session: Arc<SessionStore>,
    handles: Arc<DashMap<SubscriptionKey, SubscriptionHandle>>,
}

impl SubscriptionRegistry {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self {
            session,
            handles: Arc::new(DashMap::new()),
        }
    }

    /// Register a subscription created by `factory`.
    ///
    /// Returns the existing handle if one is live for `key` in `generation`.
    /// Returns `None` without calling `factory` if `generation` is stale.
    pub fn register<F>(
        &self,
        key: SubscriptionKey,
        generation: u64,
        factory: F,
    ) -> Option<SubscriptionHandle>
    where
        F: FnOnce() -> AbortHandle,
    {
        self.register_with_id(key, generation, |_| factory())
    }

    /// Like [`register`](Self::register), but `factory` learns the id its
    /// handle will carry, so the task can later [`release`](Self::release) itself.
    pub fn register_with_id<F>(
        &self,
        key: SubscriptionKey,
        generation: u64,
        factory: F,
    ) -> Option<SubscriptionHandle>
    where
        F: FnOnce(Uuid) -> AbortHandle,
    {
        if !self.session.is_current(generation) {
            tracing::debug!(?key, generation, "Refusing subscription for stale generation");
            return None;
        }

        match self.handles.entry(key) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.generation == generation && !existing.is_finished() {
                    return Some(existing.clone());
                }
                existing.cancel();
                let id = Uuid::new_v4();
                let handle = Self::make_handle(id, key, generation, factory(id));
                occupied.insert(handle.clone());
                Some(handle)
            }
            Entry::Vacant(vacant) => {
                let id = Uuid::new_v4();
                let handle = Self::make_handle(id, key, generation, factory(id));
                vacant.insert(handle.clone());
                tracing::debug!(?key, generation, id = %handle.id, "Subscription registered");
                Some(handle)
            }
        }
    }

    /// Spawn `task` and register it under `key`.
    pub fn spawn<Fut>(&self, key: SubscriptionKey, generation: u64, task: Fut) -> Option<SubscriptionHandle>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(key, generation, move || tokio::spawn(task).abort_handle())
    }

    /// Spawn the task built by `make_task` from its handle id.
    pub fn spawn_with_id<M, Fut>(
        &self,
        key: SubscriptionKey,
        generation: u64,
        make_task: M,
    ) -> Option<SubscriptionHandle>
    where
        M: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register_with_id(key, generation, move |id| {
            tokio::spawn(make_task(id)).abort_handle()
        })
    }

    /// Cancel and forget the subscription under `key`.
    pub fn cancel(&self, key: &SubscriptionKey) -> bool {
        match self.handles.remove(key) {
            Some((_, handle)) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget the subscription under `key` without aborting it, if it is
    /// still the handle `id`. Used by a task that is finishing on its own; a
    /// newer handle under the same key is left alone.
    pub fn release(&self, key: &SubscriptionKey, id: Uuid) -> bool {
        self.handles.remove_if(key, |_, handle| handle.id == id).is_some()
    }

    /// Cancel every subscription. Safe to call repeatedly.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<SubscriptionKey> = self.handles.iter().map(|r| *r.key()).collect();
        let mut cancelled = 0;
        for key in keys {
            if self.cancel(&key) {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::debug!(cancelled, "Cancelled all subscriptions");
        }
        cancelled
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<SubscriptionHandle> {
        self.handles.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn make_handle(
        id: Uuid,
        key: SubscriptionKey,
        generation: u64,
        abort: AbortHandle,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            id,
            key,
            generation,
            abort,
        }
    }
}
