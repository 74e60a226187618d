//! Shared harness for engine integration tests.

#![allow(dead_code)]

use alloy::primitives::{TxHash, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use wallet_sync::blockchain::mock::{MockLedger, MockWallet, RecordingNotifier};
use wallet_sync::config::EngineConfig;
use wallet_sync::tokens::TokenRegistry;
use wallet_sync::tracker::TxStatus;
use wallet_sync::{EngineEvent, WalletEngine};

pub const RECIPIENT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

/// Subscriptions a connected session holds with no transfer in flight.
pub const SESSION_SUBSCRIPTIONS: usize = 5;

pub struct Harness {
    pub engine: WalletEngine,
    pub ledger: MockLedger,
    pub wallet: MockWallet,
    pub notifier: RecordingNotifier,
    pub events: broadcast::Receiver<EngineEvent>,
}

/// Defaults with fast receipt polling and a timer that never fires in a test.
pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.tracking.receipt_poll_interval_ms = 10;
    config.tracking.max_receipt_attempts = 20;
    config.session.balance_poll_interval_ms = 3_600_000;
    config
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let ledger = MockLedger::new();
    ledger.set_token_balance(tokens(100));
    let wallet = MockWallet::new(vec![ledger.account()], 11155111);
    let notifier = RecordingNotifier::new();
    let registry = TokenRegistry::from_config(&config.tokens).expect("default tokens are valid");
    let engine = WalletEngine::new(
        &config,
        Some(Arc::new(wallet.clone())),
        Arc::new(ledger.clone()),
        Arc::new(notifier.clone()),
        &registry,
    )
    .expect("engine builds");
    let events = engine.subscribe();
    Harness {
        engine,
        ledger,
        wallet,
        notifier,
        events,
    }
}

/// `whole` tokens in raw units of an 18-decimal token.
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18))
}

/// Drain every event received so far.
pub fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Status transitions among the drained events.
pub fn statuses(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<(Option<TxHash>, TxStatus)> {
    drain(events)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::TransactionStatusChanged(tx) => Some((tx.hash, tx.status)),
            _ => None,
        })
        .collect()
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
