//! Balance synchronization for the active session.
//!
//! # Responsibilities
//! - Fetch native balance, token balance and block height together
//! - Coalesce concurrent refreshes into one in-flight fetch
//! - Drive refreshes from a timer, new blocks and token transfer events
//! - Publish snapshots; drop results from superseded sessions
//!
//! A local debit bumps `debit_seq`. A fetch remembers the sequence it started
//! under and is neither joined nor applied once the sequence has moved, so a
//! read taken before a confirmation never overwrites the debited balance.

use alloy::primitives::{Address, U256};
use arc_swap::ArcSwapOption;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::blockchain::capability::LedgerClient;
use crate::error::{WalletError, WalletResult};
use crate::events::{EngineEvent, EventBus};
use crate::observability::metrics;
use crate::session::{SessionState, SessionStore};
use crate::subscriptions::{SubscriptionKey, SubscriptionKind, SubscriptionRegistry};
use crate::tokens::{format_amount, TokenDescriptor};

/// Balances for one account as of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub address: Address,
    pub native_wei: U256,
    pub token_raw: U256,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub block_number: u64,
    /// Session generation the fetch was issued under.
    pub generation: u64,
}

impl BalanceSnapshot {
    /// Native balance in whole coins.
    pub fn native(&self) -> String {
        format_amount(self.native_wei, 18)
    }

    /// Token balance in whole tokens.
    pub fn token(&self) -> String {
        format_amount(self.token_raw, self.token_decimals)
    }
}

/// `Ok(None)`: the result belonged to a superseded session and was dropped.
pub type RefreshResult = WalletResult<Option<BalanceSnapshot>>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
    id: u64,
    generation: u64,
    debit_seq: u64,
    future: SharedRefresh,
}

struct Inner {
    session: Arc<SessionStore>,
    registry: SubscriptionRegistry,
    ledger: Arc<dyn LedgerClient>,
    token: TokenDescriptor,
    events: EventBus,
    snapshot: ArcSwapOption<BalanceSnapshot>,
    /// Guards the in-flight slot and every snapshot write.
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    debit_seq: AtomicU64,
}

/// Keeps the published [`BalanceSnapshot`] in step with the ledger.
#[derive(Clone)]
pub struct BalanceSynchronizer {
    inner: Arc<Inner>,
}

impl BalanceSynchronizer {
    pub fn new(
        session: Arc<SessionStore>,
        registry: SubscriptionRegistry,
        ledger: Arc<dyn LedgerClient>,
        token: TokenDescriptor,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                registry,
                ledger,
                token,
                events,
                snapshot: ArcSwapOption::empty(),
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(1),
                debit_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Last applied snapshot, if it belongs to the current session.
    pub fn snapshot(&self) -> Option<Arc<BalanceSnapshot>> {
        self.inner
            .snapshot
            .load_full()
            .filter(|s| self.inner.session.is_current(s.generation))
    }

    pub fn token(&self) -> &TokenDescriptor {
        &self.inner.token
    }

    /// Refresh balances for the active session.
    ///
    /// Joins the in-flight fetch if there is one for the same session.
    pub async fn refresh_now(&self) -> RefreshResult {
        let session = self.inner.session.active()?;
        self.refresh_for(&session).await
    }

    /// Refresh only if `generation` is still current. Used by the pollers.
    pub async fn refresh_if_current(&self, generation: u64) -> RefreshResult {
        match self.inner.session.active() {
            Ok(session) if session.generation == generation => self.refresh_for(&session).await,
            _ => Ok(None),
        }
    }

    async fn refresh_for(&self, session: &Arc<SessionState>) -> RefreshResult {
        let future = {
            let mut slot = self.inner.in_flight.lock();
            let debit_seq = self.inner.debit_seq.load(Ordering::SeqCst);
            match slot.as_ref() {
                Some(in_flight)
                    if in_flight.generation == session.generation
                        && in_flight.debit_seq == debit_seq =>
                {
                    in_flight.future.clone()
                }
                _ => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self
                        .clone()
                        .fetch_and_apply(session.clone(), id, debit_seq)
                        .boxed()
                        .shared();
                    *slot = Some(InFlight {
                        id,
                        generation: session.generation,
                        debit_seq,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    async fn fetch_and_apply(
        self,
        session: Arc<SessionState>,
        id: u64,
        debit_seq: u64,
    ) -> RefreshResult {
        let generation = session.generation;
        let result = match session.address {
            Some(address) => self.fetch(address, generation).await,
            None => Err(WalletError::NotConnected),
        };

        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().map(|f| f.id) == Some(id) {
            *slot = None;
        }

        if !self.inner.session.is_current(generation) {
            tracing::debug!(generation, "Dropping balance result from superseded session");
            metrics::record_stale_result("balances");
            return Ok(None);
        }

        match result {
            Ok(_) if self.inner.debit_seq.load(Ordering::SeqCst) != debit_seq => {
                tracing::debug!(generation, "Dropping balance read taken before a local debit");
                metrics::record_stale_result("balances");
                Ok(None)
            }
            Ok(snapshot) => {
                self.inner.snapshot.store(Some(Arc::new(snapshot.clone())));
                drop(slot);
                metrics::record_balance_refresh("ok");
                tracing::debug!(
                    native = %snapshot.native(),
                    token = %snapshot.token(),
                    block = snapshot.block_number,
                    "Balances updated"
                );
                self.inner
                    .events
                    .emit(EngineEvent::BalancesUpdated(snapshot.clone()));
                Ok(Some(snapshot))
            }
            Err(e) => {
                metrics::record_balance_refresh("error");
                tracing::warn!(error = %e, "Balance refresh failed");
                Err(e)
            }
        }
    }

    async fn fetch(&self, address: Address, generation: u64) -> WalletResult<BalanceSnapshot> {
        let ledger = &self.inner.ledger;
        let token = &self.inner.token;
        let (native_wei, token_raw, block_number) = future::try_join3(
            ledger.native_balance(address),
            ledger.token_balance(token.contract_address, address),
            ledger.block_number(),
        )
        .await
        .map_err(WalletError::from_ledger)?;

        Ok(BalanceSnapshot {
            address,
            native_wei,
            token_raw,
            token_symbol: token.symbol.clone(),
            token_decimals: token.decimals,
            block_number,
            generation,
        })
    }

    /// Subtract a confirmed outgoing transfer from the tracked token balance
    /// ahead of the next refresh. No-op if the snapshot is from another session.
    ///
    /// Any fetch already in flight is invalidated; the next refresh starts a
    /// new read.
    pub fn apply_debit(&self, amount_raw: U256, generation: u64) -> bool {
        if !self.inner.session.is_current(generation) {
            return false;
        }
        let debited = {
            let _slot = self.inner.in_flight.lock();
            self.inner.debit_seq.fetch_add(1, Ordering::SeqCst);
            let Some(current) = self.inner.snapshot.load_full() else {
                return false;
            };
            if current.generation != generation {
                return false;
            }
            let mut debited = (*current).clone();
            debited.token_raw = debited.token_raw.saturating_sub(amount_raw);
            self.inner.snapshot.store(Some(Arc::new(debited.clone())));
            debited
        };
        tracing::debug!(amount = %amount_raw, token = %debited.token(), "Applied confirmed debit");
        self.inner.events.emit(EngineEvent::BalancesUpdated(debited));
        true
    }

    /// Start the timer, new-block and transfer-event refresh paths for `generation`.
    ///
    /// Each path is registered once per generation; calling again is a no-op.
    pub fn start_polling(
        &self,
        generation: u64,
        period: Duration,
        on_new_blocks: bool,
        on_transfer_events: bool,
    ) {
        let registry = &self.inner.registry;

        let sync = self.clone();
        registry.spawn(
            SubscriptionKey::session(SubscriptionKind::BalancePoll),
            generation,
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // First tick fires immediately; connect already did the initial refresh
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !sync.inner.session.is_current(generation) {
                        break;
                    }
                    if let Err(e) = sync.refresh_if_current(generation).await {
                        tracing::warn!(error = %e, "Scheduled balance refresh failed, retrying next tick");
                    }
                }
            },
        );

        if on_new_blocks {
            let sync = self.clone();
            registry.spawn(
                SubscriptionKey::session(SubscriptionKind::NewBlockHeaders),
                generation,
                async move {
                    let mut blocks = match sync.inner.ledger.subscribe_new_blocks().await {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::warn!(error = %e, "New block subscription unavailable");
                            return;
                        }
                    };
                    while let Some(header) = blocks.next().await {
                        if !sync.inner.session.is_current(generation) {
                            break;
                        }
                        tracing::trace!(hash = %header.hash, "New block, refreshing balances");
                        if let Err(e) = sync.refresh_if_current(generation).await {
                            tracing::debug!(error = %e, "Block-triggered balance refresh failed");
                        }
                    }
                },
            );
        }

        if on_transfer_events {
            let session = self.inner.session.snapshot();
            let Some(address) = session.address.filter(|_| session.generation == generation) else {
                return;
            };
            let sync = self.clone();
            let token = self.inner.token.contract_address;
            registry.spawn(
                SubscriptionKey::session(SubscriptionKind::TransferEvent),
                generation,
                async move {
                    let mut logs = match sync.inner.ledger.subscribe_transfer_events(token, address).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::warn!(error = %e, "Transfer event subscription unavailable");
                            return;
                        }
                    };
                    while let Some(log) = logs.next().await {
                        if !sync.inner.session.is_current(generation) {
                            break;
                        }
                        tracing::debug!(from = %log.from, to = %log.to, value = %log.value, "Token transfer observed");
                        if let Err(e) = sync.refresh_if_current(generation).await {
                            tracing::debug!(error = %e, "Event-triggered balance refresh failed");
                        }
                    }
                },
            );
        }
    }

    /// Stop every refresh path of the current session.
    pub fn stop_polling(&self) {
        for kind in [
            SubscriptionKind::BalancePoll,
            SubscriptionKind::NewBlockHeaders,
            SubscriptionKind::TransferEvent,
        ] {
            self.inner.registry.cancel(&SubscriptionKey::session(kind));
        }
    }

    /// Compare the descriptor with what the contract reports.
    ///
    /// The descriptor stays authoritative; a mismatch is only logged.
    pub async fn verify_token_metadata(&self) -> WalletResult<bool> {
        let token = &self.inner.token;
        let (decimals, symbol) = future::try_join(
            self.inner.ledger.token_decimals(token.contract_address),
            self.inner.ledger.token_symbol(token.contract_address),
        )
        .await
        .map_err(WalletError::from_ledger)?;

        let matches = decimals == token.decimals && symbol == token.symbol;
        if !matches {
            tracing::warn!(
                configured_symbol = %token.symbol,
                configured_decimals = token.decimals,
                contract_symbol = %symbol,
                contract_decimals = decimals,
                "Token descriptor disagrees with contract metadata"
            );
        }
        Ok(matches)
    }

    /// Forget the snapshot and any in-flight fetch.
    pub fn reset(&self) {
        self.inner.snapshot.store(None);
        *self.inner.in_flight.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockLedger;

    fn token() -> TokenDescriptor {
        TokenDescriptor {
            contract_address: Address::repeat_byte(0x3d),
            symbol: "MTK".to_string(),
            name: "MTK Game Token".to_string(),
            decimals: 18,
        }
    }

    fn setup(ledger: &MockLedger) -> (Arc<SessionStore>, BalanceSynchronizer, u64) {
        let session = Arc::new(SessionStore::new());
        let generation = session.advance();
        session.publish(SessionState::connected(ledger.account(), 11155111, generation));
        let registry = SubscriptionRegistry::new(session.clone());
        let sync = BalanceSynchronizer::new(
            session.clone(),
            registry,
            Arc::new(ledger.clone()),
            token(),
            EventBus::default(),
        );
        (session, sync, generation)
    }

    #[tokio::test]
    async fn test_refresh_scales_token_balance() {
        let ledger = MockLedger::new();
        ledger.set_token_balance(U256::from(5u64) * U256::from(10u64).pow(U256::from(18)));
        ledger.set_native_balance(U256::from(2_500_000_000_000_000_000u128));
        ledger.set_block_number(4242);
        let (_, sync, _) = setup(&ledger);

        let snapshot = sync.refresh_now().await.unwrap().unwrap();
        assert_eq!(snapshot.token(), "5");
        assert_eq!(snapshot.native(), "2.5");
        assert_eq!(snapshot.block_number, 4242);
        assert_eq!(sync.snapshot().unwrap().token_raw, snapshot.token_raw);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let ledger = MockLedger::new();
        ledger.set_read_delay(Duration::from_millis(50));
        let (_, sync, _) = setup(&ledger);

        let calls = (0..8).map(|_| {
            let sync = sync.clone();
            async move { sync.refresh_now().await }
        });
        let results = future::join_all(calls).await;

        assert_eq!(ledger.balance_fetches(), 1);
        let first = results[0].clone().unwrap().unwrap();
        for result in results {
            assert_eq!(result.unwrap().unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_superseded_result_is_dropped() {
        let ledger = MockLedger::new();
        ledger.set_read_delay(Duration::from_millis(50));
        let (session, sync, _) = setup(&ledger);

        let pending = tokio::spawn({
            let sync = sync.clone();
            async move { sync.refresh_now().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.advance();

        assert_eq!(pending.await.unwrap(), Ok(None));
        assert!(sync.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_network_error_surfaces_typed() {
        let ledger = MockLedger::new();
        ledger.fail_reads("connection refused");
        let (_, sync, _) = setup(&ledger);

        let err = sync.refresh_now().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_debit_applies_once_to_current_snapshot() {
        let ledger = MockLedger::new();
        ledger.set_token_balance(U256::from(100));
        let (session, sync, generation) = setup(&ledger);
        sync.refresh_now().await.unwrap();

        assert!(sync.apply_debit(U256::from(40), generation));
        assert_eq!(sync.snapshot().unwrap().token_raw, U256::from(60));

        session.advance();
        assert!(!sync.apply_debit(U256::from(40), generation));
    }

    #[tokio::test]
    async fn test_debit_survives_read_started_before_it() {
        let ledger = MockLedger::new();
        ledger.set_token_balance(U256::from(100));
        let (_, sync, generation) = setup(&ledger);
        sync.refresh_now().await.unwrap();

        ledger.set_read_delay(Duration::from_millis(100));
        let early = tokio::spawn({
            let sync = sync.clone();
            async move { sync.refresh_now().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        ledger.set_token_balance(U256::from(60));
        assert!(sync.apply_debit(U256::from(40), generation));
        let late = sync.refresh_if_current(generation).await.unwrap().unwrap();

        assert_eq!(early.await.unwrap(), Ok(None));
        assert_eq!(late.token_raw, U256::from(60));
        assert_eq!(sync.snapshot().unwrap().token_raw, U256::from(60));
        assert_eq!(ledger.balance_fetches(), 3);
    }

    #[tokio::test]
    async fn test_block_push_triggers_refresh() {
        let ledger = MockLedger::new();
        let (_, sync, generation) = setup(&ledger);

        sync.start_polling(generation, Duration::from_secs(3600), true, false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger.push_block(7);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(ledger.balance_fetches(), 1);
        assert_eq!(sync.snapshot().unwrap().block_number, 7);
        sync.stop_polling();
    }

    #[tokio::test]
    async fn test_verify_token_metadata_reports_mismatch() {
        let ledger = MockLedger::new();
        let (_, sync, _) = setup(&ledger);
        assert!(sync.verify_token_metadata().await.unwrap());

        ledger.set_token_metadata(6, "MTK");
        assert!(!sync.verify_token_metadata().await.unwrap());
    }
}
