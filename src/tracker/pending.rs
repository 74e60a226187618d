//! Pending transaction records and the map that owns them.

use alloy::primitives::{Address, TxHash, U256};
use dashmap::DashMap;
use serde::Serialize;
use std::time::SystemTime;

/// Lifecycle status of a submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
    Rejected,
    TimedOut,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Rejected => "rejected",
            TxStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted transfer and its latest known status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTransaction {
    /// `None` only for transfers rejected before the wallet produced a hash.
    pub hash: Option<TxHash>,
    /// Human amount as entered.
    pub amount: String,
    pub amount_raw: U256,
    pub recipient: Address,
    /// Token symbol.
    pub token: String,
    pub submitted_at: SystemTime,
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub generation: u64,
}

impl PendingTransaction {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Short label for logs and notifications.
    pub fn describe(&self) -> String {
        format!("{} {} to {}", self.amount, self.token, self.recipient)
    }
}

/// Transactions awaiting finality, keyed by hash.
///
/// Removal is the terminal flag: whoever removes an entry resolved it, and
/// an entry can only be removed once.
#[derive(Debug, Default)]
pub struct PendingStore {
    entries: DashMap<TxHash, PendingTransaction>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: TxHash, tx: PendingTransaction) {
        self.entries.insert(hash, tx);
    }

    /// Claim the entry for resolution. Returns `None` if it was already
    /// resolved, cancelled, or belongs to another generation.
    pub fn resolve(&self, hash: &TxHash, generation: u64) -> Option<PendingTransaction> {
        self.entries
            .remove_if(hash, |_, tx| tx.generation == generation)
            .map(|(_, tx)| tx)
    }

    pub fn remove(&self, hash: &TxHash) -> Option<PendingTransaction> {
        self.entries.remove(hash).map(|(_, tx)| tx)
    }

    /// Drop every entry, returning the hashes that were pending.
    pub fn clear(&self) -> Vec<TxHash> {
        let hashes: Vec<TxHash> = self.entries.iter().map(|r| *r.key()).collect();
        for hash in &hashes {
            self.entries.remove(hash);
        }
        hashes
    }

    /// An in-flight transfer with the same recipient, amount and token.
    pub fn find_duplicate(&self, recipient: Address, amount_raw: U256, token: &str) -> Option<TxHash> {
        self.entries
            .iter()
            .find(|r| {
                let tx = r.value();
                tx.recipient == recipient && tx.amount_raw == amount_raw && tx.token == token
            })
            .map(|r| *r.key())
    }

    pub fn get(&self, hash: &TxHash) -> Option<PendingTransaction> {
        self.entries.get(hash).map(|r| r.value().clone())
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Snapshot of every pending transaction, oldest first.
    pub fn list(&self) -> Vec<PendingTransaction> {
        let mut txs: Vec<PendingTransaction> = self.entries.iter().map(|r| r.value().clone()).collect();
        txs.sort_by_key(|tx| tx.submitted_at);
        txs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
