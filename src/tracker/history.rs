//! Bounded log of recent transfers, newest first.

use alloy::primitives::U256;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;

use crate::tracker::pending::PendingTransaction;

struct HistoryState {
    entries: VecDeque<PendingTransaction>,
    total_sent: U256,
}

/// Recent transfers with their latest status, plus the running total of
/// confirmed amounts sent (raw units).
pub struct TransactionHistory {
    limit: usize,
    state: Mutex<HistoryState>,
}

impl TransactionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(HistoryState {
                entries: VecDeque::new(),
                total_sent: U256::ZERO,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock()
    }

    /// Add a new transfer at the front, evicting the oldest beyond the limit.
    pub fn record(&self, tx: PendingTransaction) {
        let mut state = self.lock();
        state.entries.push_front(tx);
        state.entries.truncate(self.limit);
    }

    /// Replace the entry with the same hash, if it is still in the window.
    pub fn update(&self, tx: &PendingTransaction) -> bool {
        let Some(hash) = tx.hash else {
            return false;
        };
        let mut state = self.lock();
        match state.entries.iter_mut().find(|e| e.hash == Some(hash)) {
            Some(entry) => {
                *entry = tx.clone();
                true
            }
            None => false,
        }
    }

    pub fn add_sent(&self, amount_raw: U256) {
        let mut state = self.lock();
        state.total_sent = state.total_sent.saturating_add(amount_raw);
    }

    pub fn total_sent(&self) -> U256 {
        self.lock().total_sent
    }

    pub fn entries(&self) -> Vec<PendingTransaction> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::pending::TxStatus;
    use alloy::primitives::{Address, TxHash};
    use std::time::SystemTime;

    fn tx(n: u8) -> PendingTransaction {
        PendingTransaction {
            hash: Some(TxHash::repeat_byte(n)),
            amount: n.to_string(),
            amount_raw: U256::from(n),
            recipient: Address::repeat_byte(0x11),
            token: "MTK".to_string(),
            submitted_at: SystemTime::now(),
            status: TxStatus::Pending,
            block_number: None,
            generation: 1,
        }
    }

    #[test]
    fn test_bounded_newest_first() {
        let history = TransactionHistory::new(3);
        for n in 1..=5 {
            history.record(tx(n));
        }
        let amounts: Vec<String> = history.entries().into_iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec!["5", "4", "3"]);
    }

    #[test]
    fn test_update_and_total() {
        let history = TransactionHistory::new(10);
        history.record(tx(1));

        let mut confirmed = tx(1);
        confirmed.status = TxStatus::Confirmed;
        assert!(history.update(&confirmed));
        assert_eq!(history.entries()[0].status, TxStatus::Confirmed);
        assert!(!history.update(&tx(9)));

        history.add_sent(U256::from(7));
        history.add_sent(U256::from(3));
        assert_eq!(history.total_sent(), U256::from(10));
    }
}
