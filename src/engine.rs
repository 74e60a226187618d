//! The engine facade: wires components together and exposes the public surface.
//!
//! # Architecture
//! ```text
//!                 ┌──────────────────────── WalletEngine ───────────────────────┐
//!  connect() ───▶ │ ConnectionManager ──► SessionStore (generation, snapshot)   │
//!                 │        │                                                    │
//!                 │        ├──► SubscriptionRegistry ◄── pollers / listeners    │
//!                 │        ▼                                                    │
//!  refresh() ───▶ │ BalanceSynchronizer ──► LedgerClient                        │
//!  estimate() ──▶ │ GasEstimator ─────────► LedgerClient                        │
//!  submit() ────▶ │ TransactionTracker ──► WalletProvider, LedgerClient         │
//!                 │        │                                                    │
//!                 │        ▼                                                    │
//!                 │     EventBus ──► subscribe()     Notifier ──► user          │
//!                 └─────────────────────────────────────────────────────────────┘
//! ```

use alloy::primitives::{TxHash, U256};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::balances::{BalanceSnapshot, BalanceSynchronizer, RefreshResult};
use crate::blockchain::capability::{LedgerClient, WalletProvider};
use crate::blockchain::types::ChainParams;
use crate::config::EngineConfig;
use crate::error::WalletResult;
use crate::events::{EngineEvent, EventBus};
use crate::gas::{GasEstimator, GasQuote, TransferRequest};
use crate::notify::Notifier;
use crate::session::{ConnectionManager, SessionState, SessionStore};
use crate::subscriptions::SubscriptionRegistry;
use crate::tokens::{TokenDescriptor, TokenRegistry};
use crate::tracker::{PendingTransaction, TransactionTracker};

/// Wallet session and transaction lifecycle engine.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct WalletEngine {
    session: Arc<SessionStore>,
    registry: SubscriptionRegistry,
    events: EventBus,
    balances: BalanceSynchronizer,
    estimator: GasEstimator,
    tracker: TransactionTracker,
    connection: ConnectionManager,
}

impl WalletEngine {
    /// Build an engine for the configured active token.
    ///
    /// `wallet` may be absent; `connect` then fails with `ProviderUnavailable`.
    pub fn new(
        config: &EngineConfig,
        wallet: Option<Arc<dyn WalletProvider>>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn Notifier>,
        tokens: &TokenRegistry,
    ) -> WalletResult<Self> {
        let token = tokens.resolve(&config.active_token)?;
        let session = Arc::new(SessionStore::new());
        let registry = SubscriptionRegistry::new(session.clone());
        let events = EventBus::default();

        let balances = BalanceSynchronizer::new(
            session.clone(),
            registry.clone(),
            ledger.clone(),
            token,
            events.clone(),
        );
        let estimator = GasEstimator::new(
            session.clone(),
            ledger.clone(),
            balances.clone(),
            config.gas.clone(),
        );
        let tracker = TransactionTracker::new(
            session.clone(),
            registry.clone(),
            ledger,
            wallet.clone(),
            estimator.clone(),
            balances.clone(),
            events.clone(),
            notifier.clone(),
            config.tracking.clone(),
        );
        let connection = ConnectionManager::new(
            session.clone(),
            registry.clone(),
            wallet,
            balances.clone(),
            estimator.clone(),
            tracker.clone(),
            events.clone(),
            notifier,
            config.session.clone(),
            ChainParams::from(&config.blockchain),
        );

        Ok(Self {
            session,
            registry,
            events,
            balances,
            estimator,
            tracker,
            connection,
        })
    }

    pub async fn connect(&self) -> WalletResult<Arc<SessionState>> {
        self.connection.connect().await
    }

    pub fn disconnect(&self) {
        self.connection.disconnect()
    }

    /// Refresh balances now. `Ok(None)` if the session changed meanwhile.
    pub async fn refresh_balances(&self) -> RefreshResult {
        self.balances.refresh_now().await
    }

    /// Validate a transfer and quote its fee.
    pub async fn estimate_transfer(&self, amount: &str, recipient: &str) -> WalletResult<GasQuote> {
        self.estimator
            .estimate(&TransferRequest::new(amount, recipient))
            .await
    }

    /// Submit a transfer, reusing the last quote if it is still fresh.
    pub async fn submit_transfer(&self, amount: &str, recipient: &str) -> WalletResult<PendingTransaction> {
        self.tracker
            .submit(&TransferRequest::new(amount, recipient), None)
            .await
    }

    /// Submit a transfer with a quote the caller obtained earlier.
    pub async fn submit_transfer_with_quote(
        &self,
        amount: &str,
        recipient: &str,
        quote: GasQuote,
    ) -> WalletResult<PendingTransaction> {
        self.tracker
            .submit(&TransferRequest::new(amount, recipient), Some(quote))
            .await
    }

    /// Stop tracking `hash`. Emits nothing; the transaction itself is unaffected.
    pub fn cancel_tracking(&self, hash: TxHash) -> bool {
        self.tracker.cancel_tracking(hash)
    }

    pub async fn switch_network(&self) -> WalletResult<()> {
        self.connection.switch_network().await
    }

    pub async fn add_token_to_wallet(&self) -> WalletResult<bool> {
        self.connection.add_token_to_wallet().await
    }

    /// Receive every [`EngineEvent`] emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Arc<SessionState> {
        self.session.snapshot()
    }

    /// Current generation, which may be ahead of `session()` mid-transition.
    pub fn generation(&self) -> u64 {
        self.session.generation()
    }

    pub fn balances(&self) -> Option<Arc<BalanceSnapshot>> {
        self.balances.snapshot()
    }

    pub fn token(&self) -> &TokenDescriptor {
        self.balances.token()
    }

    pub fn last_quote(&self) -> Option<Arc<GasQuote>> {
        self.estimator.last_quote()
    }

    pub fn pending_transactions(&self) -> Vec<PendingTransaction> {
        self.tracker.pending()
    }

    pub fn history(&self) -> Vec<PendingTransaction> {
        self.tracker.history()
    }

    /// Confirmed amount sent, raw token units.
    pub fn total_sent(&self) -> U256 {
        self.tracker.total_sent()
    }

    /// Number of live subscriptions and pollers.
    pub fn active_subscriptions(&self) -> usize {
        self.registry.len()
    }
}
