//! Status events published to the presentation layer.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::balances::BalanceSnapshot;
use crate::session::SessionState;
use crate::tracker::PendingTransaction;

/// Everything the engine tells the outside world about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionChanged(SessionState),
    BalancesUpdated(BalanceSnapshot),
    TransactionStatusChanged(PendingTransaction),
}

/// Fan-out of [`EngineEvent`]s to any number of subscribers.
///
/// Emitting never blocks; a subscriber that falls more than the channel
/// capacity behind sees `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
