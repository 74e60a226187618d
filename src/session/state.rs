//! Session identity and the generation counter.
//!
//! The generation is the single consistency mechanism against interleaved
//! connect/disconnect races: every async operation captures it when issued
//! and checks it with [`SessionStore::is_current`] before applying anything.
//! The counter moves first; the published snapshot follows once teardown is
//! complete, so readers never observe a half-torn-down session.

use alloy::primitives::Address;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{WalletError, WalletResult};

/// Connection identity at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub address: Option<Address>,
    pub chain_id: Option<u64>,
    pub generation: u64,
    pub connected: bool,
}

impl SessionState {
    /// The disconnected sentinel for `generation`.
    pub fn disconnected(generation: u64) -> Self {
        Self {
            address: None,
            chain_id: None,
            generation,
            connected: false,
        }
    }

    pub fn connected(address: Address, chain_id: u64, generation: u64) -> Self {
        Self {
            address: Some(address),
            chain_id: Some(chain_id),
            generation,
            connected: true,
        }
    }
}

/// Owner of the current [`SessionState`].
///
/// Only the connection manager advances or publishes; everyone else reads
/// snapshots.
#[derive(Debug)]
pub struct SessionStore {
    generation: AtomicU64,
    current: ArcSwap<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            current: ArcSwap::from_pointee(SessionState::disconnected(0)),
        }
    }

    /// Last published session.
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.current.load_full()
    }

    /// Authoritative current generation. May be ahead of the published
    /// snapshot while a transition is in progress.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// The published session if it is connected and not mid-transition.
    pub fn active(&self) -> WalletResult<Arc<SessionState>> {
        let session = self.snapshot();
        if session.connected && self.is_current(session.generation) {
            Ok(session)
        } else {
            Err(WalletError::NotConnected)
        }
    }

    /// Start a transition: invalidates every in-flight result. Returns the new generation.
    pub(crate) fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make `state` visible, unless its generation has already been superseded.
    pub(crate) fn publish(&self, state: SessionState) -> bool {
        if !self.is_current(state.generation) {
            return false;
        }
        self.current.store(Arc::new(state));
        true
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected() {
        let store = SessionStore::new();
        assert_eq!(store.generation(), 0);
        assert!(!store.snapshot().connected);
        assert_eq!(store.active().unwrap_err(), WalletError::NotConnected);
    }

    #[test]
    fn test_advance_is_strictly_increasing() {
        let store = SessionStore::new();
        let mut last = store.generation();
        for _ in 0..10 {
            let next = store.advance();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_publish_rejects_superseded_generation() {
        let store = SessionStore::new();
        let g1 = store.advance();
        let g2 = store.advance();

        assert!(!store.publish(SessionState::connected(Address::ZERO, 1, g1)));
        assert!(!store.snapshot().connected);

        assert!(store.publish(SessionState::connected(Address::ZERO, 1, g2)));
        assert_eq!(store.active().unwrap().generation, g2);
    }

    #[test]
    fn test_active_requires_current_generation() {
        let store = SessionStore::new();
        let g = store.advance();
        store.publish(SessionState::connected(Address::ZERO, 1, g));
        assert!(store.active().is_ok());

        // Transition started but not yet published
        store.advance();
        assert!(store.active().is_err());
    }
}
