//! Transfer submission and finality tracking.
//!
//! # Responsibilities
//! - Re-validate and submit transfers with a fresh gas quote
//! - Track each hash on two channels: fixed-interval receipt polling and
//!   new-block push, both querying the receipt
//! - Resolve each hash exactly once; the losing channel is cancelled
//! - Emit one status event per terminal outcome
//!
//! # Finality race
//! ```text
//! submit ──► PendingStore.insert(hash)
//!              │
//!     ┌────────┴─────────┐
//!  ReceiptPoll      NewBlockHeaders
//!     │ receipt?         │ receipt?
//!     └──► finalize ◄────┘
//!           PendingStore.resolve(hash)  (only one caller gets the entry)
//!           cancel sibling, release own handle
//!           history, event, notification, debit
//! ```

use alloy::primitives::TxHash;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::balances::BalanceSynchronizer;
use crate::blockchain::capability::{LedgerClient, WalletProvider};
use crate::blockchain::types::TxReceipt;
use crate::config::TrackingConfig;
use crate::error::{WalletError, WalletResult};
use crate::events::{EngineEvent, EventBus};
use crate::gas::{GasEstimator, GasQuote, TransferRequest, ValidatedTransfer};
use crate::notify::{NotificationKind, Notifier};
use crate::observability::metrics;
use crate::session::SessionStore;
use crate::subscriptions::{SubscriptionKey, SubscriptionKind, SubscriptionRegistry};
use crate::tracker::history::TransactionHistory;
use crate::tracker::pending::{PendingStore, PendingTransaction, TxStatus};

const TRACKING_KINDS: [SubscriptionKind; 2] =
    [SubscriptionKind::ReceiptPoll, SubscriptionKind::NewBlockHeaders];

struct Inner {
    session: Arc<SessionStore>,
    registry: SubscriptionRegistry,
    ledger: Arc<dyn LedgerClient>,
    wallet: Option<Arc<dyn WalletProvider>>,
    estimator: GasEstimator,
    balances: BalanceSynchronizer,
    events: EventBus,
    notifier: Arc<dyn Notifier>,
    config: TrackingConfig,
    pending: PendingStore,
    history: TransactionHistory,
}

/// Submits transfers and follows them to a terminal status.
#[derive(Clone)]
pub struct TransactionTracker {
    inner: Arc<Inner>,
}

impl TransactionTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<SessionStore>,
        registry: SubscriptionRegistry,
        ledger: Arc<dyn LedgerClient>,
        wallet: Option<Arc<dyn WalletProvider>>,
        estimator: GasEstimator,
        balances: BalanceSynchronizer,
        events: EventBus,
        notifier: Arc<dyn Notifier>,
        config: TrackingConfig,
    ) -> Self {
        let history = TransactionHistory::new(config.history_limit);
        Self {
            inner: Arc::new(Inner {
                session,
                registry,
                ledger,
                wallet,
                estimator,
                balances,
                events,
                notifier,
                config,
                pending: PendingStore::new(),
                history,
            }),
        }
    }

    /// Submit a transfer and start tracking it.
    ///
    /// Returns once the wallet produced a hash. `quote` is reused only if it
    /// is still fresh and was computed for this transfer in this session.
    pub async fn submit(
        &self,
        request: &TransferRequest,
        quote: Option<GasQuote>,
    ) -> WalletResult<PendingTransaction> {
        let inner = &self.inner;
        let session = inner.session.active()?;
        let generation = session.generation;
        let transfer = inner.estimator.validate(request)?;

        if inner.config.reject_duplicate_submissions {
            if let Some(existing) = inner.pending.find_duplicate(
                transfer.recipient,
                transfer.amount_raw,
                &transfer.token.symbol,
            ) {
                return Err(WalletError::DuplicateSubmission(existing.to_string()));
            }
        }

        let wallet = inner.wallet.clone().ok_or(WalletError::ProviderUnavailable)?;

        let quote = match inner.estimator.fresh_quote(&session, &transfer, quote).await {
            Ok(quote) => quote,
            Err(e) => return Err(self.reject(&transfer, generation, e)),
        };

        let sent = wallet
            .send_transfer(
                transfer.token.contract_address,
                transfer.recipient,
                transfer.amount_raw,
                quote.gas_params(),
            )
            .await;
        let hash = match sent {
            Ok(hash) => hash,
            Err(e) => return Err(self.reject(&transfer, generation, WalletError::from_send(e))),
        };

        let tx = PendingTransaction {
            hash: Some(hash),
            amount: transfer.amount.clone(),
            amount_raw: transfer.amount_raw,
            recipient: transfer.recipient,
            token: transfer.token.symbol.clone(),
            submitted_at: SystemTime::now(),
            status: TxStatus::Pending,
            block_number: None,
            generation,
        };

        if !inner.session.is_current(generation) {
            tracing::warn!(%hash, generation, "Transfer broadcast after its session ended, not tracking");
            metrics::record_stale_result("submit");
            return Ok(tx);
        }

        inner.pending.insert(hash, tx.clone());
        inner.history.record(tx.clone());
        metrics::record_pending_count(inner.pending.len());
        tracing::info!(
            %hash,
            amount = %tx.amount,
            token = %tx.token,
            recipient = %tx.recipient,
            gas_units = quote.gas_units,
            gas_price_gwei = %quote.gas_price_gwei(),
            "Transfer submitted"
        );
        inner
            .events
            .emit(EngineEvent::TransactionStatusChanged(tx.clone()));
        inner.notifier.notify(
            &format!("Transaction sent: {} ({})", tx.describe(), hash),
            NotificationKind::Info,
        );

        self.start_tracking(hash, generation);
        Ok(tx)
    }

    /// Record a transfer that never produced a hash. Emits one `Rejected`
    /// event and one notification, unless the session has moved on.
    fn reject(&self, transfer: &ValidatedTransfer, generation: u64, error: WalletError) -> WalletError {
        let inner = &self.inner;
        if !inner.session.is_current(generation) || error == WalletError::SessionSuperseded {
            return error;
        }

        let tx = PendingTransaction {
            hash: None,
            amount: transfer.amount.clone(),
            amount_raw: transfer.amount_raw,
            recipient: transfer.recipient,
            token: transfer.token.symbol.clone(),
            submitted_at: SystemTime::now(),
            status: TxStatus::Rejected,
            block_number: None,
            generation,
        };
        metrics::record_transaction(TxStatus::Rejected.as_str());
        tracing::warn!(error = %error, transfer = %tx.describe(), "Transfer rejected");
        inner.history.record(tx.clone());
        inner.events.emit(EngineEvent::TransactionStatusChanged(tx));
        inner.notifier.notify(
            &format!("Transaction rejected: {}", error),
            NotificationKind::Error,
        );
        error
    }

    fn start_tracking(&self, hash: TxHash, generation: u64) {
        let inner = &self.inner;
        let period = Duration::from_millis(inner.config.receipt_poll_interval_ms);
        let max_attempts = inner.config.max_receipt_attempts;

        let tracker = self.clone();
        inner.registry.spawn_with_id(
            SubscriptionKey::transaction(SubscriptionKind::ReceiptPoll, hash),
            generation,
            move |id| async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                for attempt in 1..=max_attempts {
                    ticker.tick().await;
                    if !tracker.inner.session.is_current(generation) {
                        return;
                    }
                    match tracker.inner.ledger.transaction_receipt(hash).await {
                        Ok(Some(receipt)) => {
                            tracker.finalize(hash, generation, Some(receipt), SubscriptionKind::ReceiptPoll, id);
                            return;
                        }
                        Ok(None) => tracing::trace!(%hash, attempt, "Receipt not yet available"),
                        Err(e) => tracing::debug!(%hash, attempt, error = %e, "Receipt poll failed"),
                    }
                }
                tracker.finalize(hash, generation, None, SubscriptionKind::ReceiptPoll, id);
            },
        );

        let tracker = self.clone();
        inner.registry.spawn_with_id(
            SubscriptionKey::transaction(SubscriptionKind::NewBlockHeaders, hash),
            generation,
            move |id| async move {
                let mut blocks = match tracker.inner.ledger.subscribe_new_blocks().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!(%hash, error = %e, "No block push channel, relying on polling");
                        return;
                    }
                };
                while let Some(header) = blocks.next().await {
                    if !tracker.inner.session.is_current(generation) {
                        return;
                    }
                    match tracker.inner.ledger.transaction_receipt(hash).await {
                        Ok(Some(receipt)) => {
                            tracker.finalize(hash, generation, Some(receipt), SubscriptionKind::NewBlockHeaders, id);
                            return;
                        }
                        Ok(None) => {}
                        Err(e) => tracing::debug!(%hash, block = ?header.number, error = %e, "Receipt lookup on new block failed"),
                    }
                }
            },
        );
    }

    /// Resolve `hash` from the channel `winner`, whose subscription handle is
    /// `winner_id`. `receipt == None` means the poller ran out of attempts.
    /// Returns whether this call resolved it.
    fn finalize(
        &self,
        hash: TxHash,
        generation: u64,
        receipt: Option<TxReceipt>,
        winner: SubscriptionKind,
        winner_id: Uuid,
    ) -> bool {
        let inner = &self.inner;
        if !inner.session.is_current(generation) {
            tracing::debug!(%hash, generation, "Dropping receipt from superseded session");
            metrics::record_stale_result("receipt");
            return false;
        }
        let Some(mut tx) = inner.pending.resolve(&hash, generation) else {
            tracing::trace!(%hash, ?winner, "Already resolved by the other channel");
            return false;
        };

        for kind in TRACKING_KINDS {
            let key = SubscriptionKey::transaction(kind, hash);
            if kind == winner {
                inner.registry.release(&key, winner_id);
            } else {
                inner.registry.cancel(&key);
            }
        }
        metrics::record_pending_count(inner.pending.len());

        if !inner.session.is_current(generation) {
            metrics::record_stale_result("receipt");
            return false;
        }

        tx.status = match receipt {
            Some(r) if r.success => TxStatus::Confirmed,
            Some(_) => TxStatus::Failed,
            None => TxStatus::TimedOut,
        };
        tx.block_number = receipt.and_then(|r| r.block_number);

        metrics::record_transaction(tx.status.as_str());
        tracing::info!(%hash, status = %tx.status, block = ?tx.block_number, via = ?winner, "Transaction resolved");
        inner.history.update(&tx);
        inner
            .events
            .emit(EngineEvent::TransactionStatusChanged(tx.clone()));

        match tx.status {
            TxStatus::Confirmed => {
                inner.history.add_sent(tx.amount_raw);
                inner.balances.apply_debit(tx.amount_raw, generation);
                inner.notifier.notify(
                    &format!("Transfer confirmed: {}", tx.describe()),
                    NotificationKind::Success,
                );
                let balances = inner.balances.clone();
                tokio::spawn(async move {
                    if let Err(e) = balances.refresh_if_current(generation).await {
                        tracing::warn!(error = %e, "Post-confirmation balance refresh failed");
                    }
                });
            }
            TxStatus::Failed => inner.notifier.notify(
                &format!("Transfer failed on-chain: {}", tx.describe()),
                NotificationKind::Error,
            ),
            _ => {
                let error = WalletError::TimedOut(inner.config.max_receipt_attempts);
                tracing::warn!(%hash, error = %error, "Giving up on receipt");
                inner.notifier.notify(
                    &format!("{}: {} may still be mined, refresh balances later", error, hash),
                    NotificationKind::Warning,
                );
            }
        }
        true
    }

    /// Stop tracking `hash` without resolving it. No event is emitted.
    pub fn cancel_tracking(&self, hash: TxHash) -> bool {
        let inner = &self.inner;
        for kind in TRACKING_KINDS {
            inner.registry.cancel(&SubscriptionKey::transaction(kind, hash));
        }
        let removed = inner.pending.remove(&hash).is_some();
        if removed {
            tracing::info!(%hash, "Stopped tracking transaction");
            metrics::record_pending_count(inner.pending.len());
        }
        removed
    }

    /// Drop every pending transaction and its trackers, silently.
    pub fn clear_all(&self) -> usize {
        let inner = &self.inner;
        let hashes = inner.pending.clear();
        for hash in &hashes {
            for kind in TRACKING_KINDS {
                inner.registry.cancel(&SubscriptionKey::transaction(kind, *hash));
            }
        }
        metrics::record_pending_count(0);
        hashes.len()
    }

    pub fn pending(&self) -> Vec<PendingTransaction> {
        self.inner.pending.list()
    }

    pub fn is_pending(&self, hash: &TxHash) -> bool {
        self.inner.pending.contains(hash)
    }

    pub fn history(&self) -> Vec<PendingTransaction> {
        self.inner.history.entries()
    }

    /// Total confirmed amount sent, raw token units.
    pub fn total_sent(&self) -> alloy::primitives::U256 {
        self.inner.history.total_sent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::{MockLedger, MockWallet, RecordingNotifier};
    use crate::blockchain::types::ProviderError;
    use crate::config::GasConfig;
    use crate::session::SessionState;
    use crate::tokens::TokenDescriptor;
    use alloy::primitives::{Address, U256};
    use tokio::sync::broadcast;

    const RECIPIENT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    struct Fixture {
        session: Arc<SessionStore>,
        registry: SubscriptionRegistry,
        ledger: MockLedger,
        wallet: MockWallet,
        notifier: RecordingNotifier,
        events: broadcast::Receiver<EngineEvent>,
        tracker: TransactionTracker,
        balances: BalanceSynchronizer,
        generation: u64,
    }

    async fn fixture(config: TrackingConfig) -> Fixture {
        let ledger = MockLedger::new();
        ledger.set_token_balance(U256::from(100));
        let wallet = MockWallet::new(vec![ledger.account()], 11155111);
        let notifier = RecordingNotifier::new();
        let session = Arc::new(SessionStore::new());
        let generation = session.advance();
        session.publish(SessionState::connected(ledger.account(), 11155111, generation));
        let registry = SubscriptionRegistry::new(session.clone());
        let bus = EventBus::default();
        let events = bus.subscribe();
        let ledger_dyn: Arc<dyn LedgerClient> = Arc::new(ledger.clone());
        let balances = BalanceSynchronizer::new(
            session.clone(),
            registry.clone(),
            ledger_dyn.clone(),
            TokenDescriptor {
                contract_address: Address::repeat_byte(0x3d),
                symbol: "MTK".to_string(),
                name: "MTK Game Token".to_string(),
                decimals: 0,
            },
            bus.clone(),
        );
        balances.refresh_now().await.unwrap();
        let estimator = GasEstimator::new(
            session.clone(),
            ledger_dyn.clone(),
            balances.clone(),
            GasConfig::default(),
        );
        let tracker = TransactionTracker::new(
            session.clone(),
            registry.clone(),
            ledger_dyn,
            Some(Arc::new(wallet.clone())),
            estimator,
            balances.clone(),
            bus,
            Arc::new(notifier.clone()),
            config,
        );
        Fixture {
            session,
            registry,
            ledger,
            wallet,
            notifier,
            events,
            tracker,
            balances,
            generation,
        }
    }

    fn fast_tracking() -> TrackingConfig {
        TrackingConfig {
            receipt_poll_interval_ms: 10,
            max_receipt_attempts: 5,
            ..TrackingConfig::default()
        }
    }

    fn statuses(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<TxStatus> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::TransactionStatusChanged(tx) = event {
                out.push(tx.status);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_poll_confirms_and_debits_once() {
        let mut f = fixture(fast_tracking()).await;
        let tx = f
            .tracker
            .submit(&TransferRequest::new("10", RECIPIENT), None)
            .await
            .unwrap();
        let hash = tx.hash.unwrap();
        assert!(f.tracker.is_pending(&hash));

        f.ledger.mine_transfer(hash, U256::from(10), true);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!f.tracker.is_pending(&hash));
        assert_eq!(statuses(&mut f.events), vec![TxStatus::Pending, TxStatus::Confirmed]);
        assert_eq!(f.balances.snapshot().unwrap().token_raw, U256::from(90));
        assert_eq!(f.tracker.total_sent(), U256::from(10));
        assert!(!f.registry.contains(&SubscriptionKey::transaction(SubscriptionKind::ReceiptPoll, hash)));
        assert!(!f.registry.contains(&SubscriptionKey::transaction(SubscriptionKind::NewBlockHeaders, hash)));
        assert_eq!(f.notifier.count(NotificationKind::Success), 1);
    }

    #[tokio::test]
    async fn test_push_and_poll_race_resolves_once() {
        let config = TrackingConfig {
            receipt_poll_interval_ms: 5,
            max_receipt_attempts: 50,
            ..TrackingConfig::default()
        };
        let mut f = fixture(config).await;
        let hash = f
            .tracker
            .submit(&TransferRequest::new("10", RECIPIENT), None)
            .await
            .unwrap()
            .hash
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        f.ledger.mine_transfer(hash, U256::from(10), true);
        f.ledger.push_block(10);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let resolved: Vec<TxStatus> = statuses(&mut f.events)
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(resolved, vec![TxStatus::Confirmed]);
        assert_eq!(f.tracker.total_sent(), U256::from(10));
    }

    #[tokio::test]
    async fn test_failed_receipt() {
        let mut f = fixture(fast_tracking()).await;
        let hash = f
            .tracker
            .submit(&TransferRequest::new("10", RECIPIENT), None)
            .await
            .unwrap()
            .hash
            .unwrap();
        f.ledger.mine_transfer(hash, U256::from(10), false);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(statuses(&mut f.events), vec![TxStatus::Pending, TxStatus::Failed]);
        assert_eq!(f.balances.snapshot().unwrap().token_raw, U256::from(100));
        assert_eq!(f.tracker.total_sent(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_times_out_after_attempts() {
        let config = TrackingConfig {
            receipt_poll_interval_ms: 5,
            max_receipt_attempts: 3,
            ..TrackingConfig::default()
        };
        let mut f = fixture(config).await;
        let hash = f
            .tracker
            .submit(&TransferRequest::new("1", RECIPIENT), None)
            .await
            .unwrap()
            .hash
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(statuses(&mut f.events), vec![TxStatus::Pending, TxStatus::TimedOut]);
        assert!(!f.tracker.is_pending(&hash));
        assert_eq!(f.ledger.receipt_queries(), 3);
        for kind in TRACKING_KINDS {
            assert!(!f.registry.contains(&SubscriptionKey::transaction(kind, hash)));
        }
        assert_eq!(f.notifier.count(NotificationKind::Warning), 1);
    }

    #[tokio::test]
    async fn test_user_rejection_never_enters_pending() {
        let mut f = fixture(fast_tracking()).await;
        f.wallet
            .script_send(Err(ProviderError::with_code(4001, "User denied transaction signature")));

        let err = f
            .tracker
            .submit(&TransferRequest::new("1", RECIPIENT), None)
            .await
            .unwrap_err();

        assert_eq!(err, WalletError::UserRejected);
        assert!(f.tracker.pending().is_empty());
        assert_eq!(statuses(&mut f.events), vec![TxStatus::Rejected]);
        assert_eq!(f.notifier.messages().len(), 1);
        assert_eq!(f.notifier.count(NotificationKind::Error), 1);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_rejections() {
        let mut f = fixture(fast_tracking()).await;
        let err = f
            .tracker
            .submit(&TransferRequest::new("1000", RECIPIENT), None)
            .await
            .unwrap_err();

        assert!(matches!(err, WalletError::InsufficientBalance { .. }));
        assert!(statuses(&mut f.events).is_empty());
        assert!(f.wallet.sent().is_empty());
    }

    #[tokio::test]
    async fn test_late_receipt_after_teardown_is_discarded() {
        let mut f = fixture(fast_tracking()).await;
        let hash = f
            .tracker
            .submit(&TransferRequest::new("10", RECIPIENT), None)
            .await
            .unwrap()
            .hash
            .unwrap();
        statuses(&mut f.events);

        f.session.advance();
        f.registry.cancel_all();
        f.tracker.clear_all();
        f.ledger.mine_transfer(hash, U256::from(10), true);

        assert!(!f.tracker.finalize(
            hash,
            f.generation,
            Some(TxReceipt {
                transaction_hash: hash,
                success: true,
                block_number: Some(2),
                gas_used: 52_000,
            }),
            SubscriptionKind::ReceiptPoll,
            Uuid::nil(),
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(statuses(&mut f.events).is_empty());
        assert!(f.tracker.pending().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_policy() {
        let config = TrackingConfig {
            reject_duplicate_submissions: true,
            ..fast_tracking()
        };
        let f = fixture(config).await;
        let request = TransferRequest::new("1", RECIPIENT);
        f.tracker.submit(&request, None).await.unwrap();

        assert!(matches!(
            f.tracker.submit(&request, None).await,
            Err(WalletError::DuplicateSubmission(_))
        ));
        assert_eq!(f.wallet.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_permissive_duplicates_by_default() {
        let f = fixture(fast_tracking()).await;
        let request = TransferRequest::new("1", RECIPIENT);
        f.tracker.submit(&request, None).await.unwrap();
        f.tracker.submit(&request, None).await.unwrap();
        assert_eq!(f.tracker.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_tracking_is_silent() {
        let mut f = fixture(fast_tracking()).await;
        let hash = f
            .tracker
            .submit(&TransferRequest::new("1", RECIPIENT), None)
            .await
            .unwrap()
            .hash
            .unwrap();
        statuses(&mut f.events);

        assert!(f.tracker.cancel_tracking(hash));
        assert!(!f.tracker.cancel_tracking(hash));
        f.ledger.mine_transfer(hash, U256::from(1), true);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(statuses(&mut f.events).is_empty());
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_submit_reuses_fresh_quote() {
        let f = fixture(fast_tracking()).await;
        let request = TransferRequest::new("2", RECIPIENT);
        let quote = f.tracker.inner.estimator.estimate(&request).await.unwrap();
        assert_eq!(f.ledger.estimate_calls(), 1);

        f.tracker.submit(&request, Some(quote.clone())).await.unwrap();
        assert_eq!(f.ledger.estimate_calls(), 1);
        assert_eq!(f.wallet.sent()[0].gas, quote.gas_params());
    }
}
