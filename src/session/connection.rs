//! Session lifecycle: connect, disconnect, and wallet-driven transitions.
//!
//! # State Machine
//! ```text
//! Disconnected ──connect()──► Connecting ──accounts + chain──► Connected
//!      ▲                                                          │
//!      └──── disconnect() / accounts emptied / chain changed ─────┘
//!                 (account switch re-enters Connecting)
//! ```
//!
//! Every transition advances the generation first, tears down subscriptions
//! and pending transactions, and only then publishes the new state.
//! `connect()` on a live session whose wallet still reports the same account
//! and chain is not a transition: the session and its transfers are kept.

use alloy::primitives::Address;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::balances::BalanceSynchronizer;
use crate::blockchain::capability::{WalletEvent, WalletProvider};
use crate::blockchain::types::ChainParams;
use crate::config::SessionConfig;
use crate::error::{WalletError, WalletResult};
use crate::events::{EngineEvent, EventBus};
use crate::gas::GasEstimator;
use crate::notify::{NotificationKind, Notifier};
use crate::observability::metrics;
use crate::session::state::{SessionState, SessionStore};
use crate::subscriptions::{SubscriptionKey, SubscriptionKind, SubscriptionRegistry};
use crate::tracker::TransactionTracker;

type SharedConnect = Shared<BoxFuture<'static, WalletResult<Arc<SessionState>>>>;

struct Inner {
    session: Arc<SessionStore>,
    registry: SubscriptionRegistry,
    wallet: Option<Arc<dyn WalletProvider>>,
    balances: BalanceSynchronizer,
    estimator: GasEstimator,
    tracker: TransactionTracker,
    events: EventBus,
    notifier: Arc<dyn Notifier>,
    config: SessionConfig,
    chain: ChainParams,
    connecting: Mutex<Option<(u64, SharedConnect)>>,
    next_attempt: AtomicU64,
}

/// Owns the session and drives every transition of it.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<SessionStore>,
        registry: SubscriptionRegistry,
        wallet: Option<Arc<dyn WalletProvider>>,
        balances: BalanceSynchronizer,
        estimator: GasEstimator,
        tracker: TransactionTracker,
        events: EventBus,
        notifier: Arc<dyn Notifier>,
        config: SessionConfig,
        chain: ChainParams,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                registry,
                wallet,
                balances,
                estimator,
                tracker,
                events,
                notifier,
                config,
                chain,
                connecting: Mutex::new(None),
                next_attempt: AtomicU64::new(1),
            }),
        }
    }

    fn wallet(&self) -> WalletResult<Arc<dyn WalletProvider>> {
        self.inner
            .wallet
            .clone()
            .ok_or(WalletError::ProviderUnavailable)
    }

    /// Connect to the wallet's first account.
    ///
    /// Calls made while an attempt is in flight join that attempt.
    pub async fn connect(&self) -> WalletResult<Arc<SessionState>> {
        let future = {
            let mut slot = self.inner.connecting.lock();
            match slot.as_ref() {
                Some((_, in_flight)) => in_flight.clone(),
                None => {
                    let id = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let future = self.clone().connect_attempt(id).boxed().shared();
                    *slot = Some((id, future.clone()));
                    future
                }
            }
        };
        future.await
    }

    async fn connect_attempt(self, id: u64) -> WalletResult<Arc<SessionState>> {
        let result = self.connect_or_resume().await;
        let mut slot = self.inner.connecting.lock();
        if slot.as_ref().map(|(slot_id, _)| *slot_id) == Some(id) {
            *slot = None;
        }
        result
    }

    /// Keep the live session if the wallet still reports its account and
    /// chain; otherwise open a new one.
    async fn connect_or_resume(&self) -> WalletResult<Arc<SessionState>> {
        let current = self.inner.session.snapshot();
        if !current.connected {
            return self.establish(None).await;
        }

        let wallet = self.wallet()?;
        let accounts = wallet
            .request_accounts()
            .await
            .map_err(WalletError::from_connect)?;
        let chain_id = wallet.chain_id().await.map_err(WalletError::from_connect)?;

        match accounts.first() {
            Some(&first)
                if current.address == Some(first)
                    && current.chain_id == Some(chain_id)
                    && self.inner.session.is_current(current.generation) =>
            {
                tracing::debug!(generation = current.generation, "Already connected, keeping session");
                Ok(current)
            }
            Some(&first) => {
                tracing::info!(from = ?current.address, to = %first, chain_id, "Wallet changed since last connect");
                self.establish(Some(first)).await
            }
            None => self.establish(None).await,
        }
    }

    /// Open a new session. With `account` set the wallet is not asked for
    /// accounts again (it just announced them).
    async fn establish(&self, account: Option<Address>) -> WalletResult<Arc<SessionState>> {
        let wallet = self.wallet()?;
        let was_connected = self.inner.session.snapshot().connected;
        let generation = self.teardown("connect");
        tracing::debug!(generation, "Connecting");

        match self.open(&wallet, generation, account).await {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(error = %e, generation, "Connect failed");
                if self.inner.session.publish(SessionState::disconnected(generation)) && was_connected {
                    self.emit_session();
                }
                if e != WalletError::SessionSuperseded {
                    self.inner
                        .notifier
                        .notify(&format!("Connection failed: {}", e), NotificationKind::Error);
                }
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        wallet: &Arc<dyn WalletProvider>,
        generation: u64,
        account: Option<Address>,
    ) -> WalletResult<Arc<SessionState>> {
        let inner = &self.inner;
        let address = match account {
            Some(address) => address,
            None => {
                let accounts = wallet
                    .request_accounts()
                    .await
                    .map_err(WalletError::from_connect)?;
                *accounts.first().ok_or(WalletError::NoAccounts)?
            }
        };
        let chain_id = wallet.chain_id().await.map_err(WalletError::from_connect)?;

        let state = SessionState::connected(address, chain_id, generation);
        if !inner.session.publish(state.clone()) {
            metrics::record_stale_result("connect");
            return Err(WalletError::SessionSuperseded);
        }
        metrics::record_session_transition("connected");
        tracing::info!(%address, chain_id, generation, "Session connected");
        self.emit_session();
        self.check_network(chain_id);
        self.listen(wallet, generation);

        if let Err(e) = inner.balances.verify_token_metadata().await {
            tracing::warn!(error = %e, "Could not read token metadata");
        }
        if let Err(e) = inner.balances.refresh_if_current(generation).await {
            tracing::warn!(error = %e, "Initial balance refresh failed, polling will retry");
        }
        inner.balances.start_polling(
            generation,
            Duration::from_millis(inner.config.balance_poll_interval_ms),
            inner.config.refresh_on_new_blocks,
            inner.config.refresh_on_transfer_events,
        );

        if !inner.session.is_current(generation) {
            return Err(WalletError::SessionSuperseded);
        }
        inner.notifier.notify(
            &format!("Connected: {}", address),
            NotificationKind::Success,
        );
        Ok(Arc::new(state))
    }

    /// Advance the generation and cancel everything the old session started.
    /// The caller publishes the next state.
    fn teardown(&self, reason: &'static str) -> u64 {
        let inner = &self.inner;
        let generation = inner.session.advance();
        let cancelled = inner.registry.cancel_all();
        let dropped = inner.tracker.clear_all();
        inner.balances.reset();
        inner.estimator.clear();
        tracing::debug!(generation, cancelled, dropped, reason, "Session torn down");
        generation
    }

    fn emit_session(&self) {
        let state = (*self.inner.session.snapshot()).clone();
        self.inner.events.emit(EngineEvent::SessionChanged(state));
    }

    fn check_network(&self, chain_id: u64) {
        let Some(expected) = self.inner.config.expected_chain_id else {
            return;
        };
        if expected != chain_id {
            tracing::warn!(chain_id, expected, "Wallet is on an unexpected network");
            self.inner.notifier.notify(
                &format!(
                    "Wrong network: wallet is on chain {}, expected {} ({})",
                    chain_id, expected, self.inner.chain.chain_name
                ),
                NotificationKind::Warning,
            );
        }
    }

    /// Register the account and chain listeners for `generation`.
    ///
    /// Handlers run in their own task: they tear the session down, which
    /// aborts the listener that spawned them.
    fn listen(&self, wallet: &Arc<dyn WalletProvider>, generation: u64) {
        for kind in [SubscriptionKind::AccountsChanged, SubscriptionKind::ChainChanged] {
            let mut events = wallet.events();
            let manager = self.clone();
            self.inner.registry.spawn(
                SubscriptionKey::session(kind),
                generation,
                async move {
                    loop {
                        let event = match events.recv().await {
                            Ok(event) => event,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "Wallet events lagged");
                                continue;
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        };
                        if !manager.inner.session.is_current(generation) {
                            break;
                        }
                        match (kind, event) {
                            (SubscriptionKind::AccountsChanged, WalletEvent::AccountsChanged(accounts)) => {
                                let manager = manager.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = manager.on_accounts_changed(accounts).await {
                                        tracing::warn!(error = %e, "Reconnect after account change failed");
                                    }
                                });
                            }
                            (SubscriptionKind::ChainChanged, WalletEvent::ChainChanged(chain_id)) => {
                                let manager = manager.clone();
                                tokio::spawn(async move {
                                    manager.on_chain_changed(chain_id);
                                });
                            }
                            _ => {}
                        }
                    }
                },
            );
        }
    }

    /// Tear the session down. Idempotent.
    pub fn disconnect(&self) {
        let was_connected = self.inner.session.snapshot().connected;
        *self.inner.connecting.lock() = None;
        let generation = self.teardown("disconnect");
        self.inner
            .session
            .publish(SessionState::disconnected(generation));
        if was_connected {
            metrics::record_session_transition("disconnected");
            tracing::info!(generation, "Session disconnected");
            self.emit_session();
        }
    }

    /// React to the wallet announcing a new account list.
    ///
    /// An empty list disconnects; a different first account reconnects with
    /// it. Returns the new session, if one was opened.
    pub async fn on_accounts_changed(
        &self,
        accounts: Vec<Address>,
    ) -> WalletResult<Option<Arc<SessionState>>> {
        let current = self.inner.session.snapshot();
        if !current.connected {
            return Ok(None);
        }
        let Some(&first) = accounts.first() else {
            tracing::info!("Wallet reported no accounts");
            self.disconnect();
            return Ok(None);
        };
        if current.address == Some(first) {
            return Ok(None);
        }
        tracing::info!(from = ?current.address, to = %first, "Account changed, reconnecting");
        metrics::record_session_transition("account_changed");
        self.establish(Some(first)).await.map(Some)
    }

    /// React to the wallet switching networks: full teardown, no reconnect.
    pub fn on_chain_changed(&self, chain_id: u64) {
        let current = self.inner.session.snapshot();
        if !current.connected {
            return;
        }
        tracing::info!(from = ?current.chain_id, to = chain_id, "Network changed, session closed");
        metrics::record_session_transition("chain_changed");
        let generation = self.teardown("chain_changed");
        self.inner
            .session
            .publish(SessionState::disconnected(generation));
        self.emit_session();
        self.inner.notifier.notify(
            &format!("Network changed to chain {}; reconnect to continue", chain_id),
            NotificationKind::Warning,
        );
    }

    /// Ask the wallet to switch to the configured network, adding it first
    /// if the wallet does not know it.
    pub async fn switch_network(&self) -> WalletResult<()> {
        let wallet = self.wallet()?;
        let params = &self.inner.chain;
        let target = self.inner.config.expected_chain_id.unwrap_or(params.chain_id);

        match wallet.switch_chain(target).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_unrecognized_chain() => {
                tracing::info!(chain_id = target, "Wallet does not know the network, adding it");
                let params = ChainParams {
                    chain_id: target,
                    ..params.clone()
                };
                wallet
                    .add_chain(&params)
                    .await
                    .map_err(WalletError::from_connect)?;
                wallet
                    .switch_chain(target)
                    .await
                    .map_err(WalletError::from_connect)
            }
            Err(e) => Err(WalletError::from_connect(e)),
        }
    }

    /// Ask the wallet to display the active token. Returns whether the user accepted.
    pub async fn add_token_to_wallet(&self) -> WalletResult<bool> {
        let wallet = self.wallet()?;
        let token = self.inner.balances.token();
        let accepted = wallet
            .watch_asset(token)
            .await
            .map_err(WalletError::from_connect)?;
        if accepted {
            self.inner.notifier.notify(
                &format!("{} added to wallet", token.symbol),
                NotificationKind::Success,
            );
        }
        Ok(accepted)
    }
}
