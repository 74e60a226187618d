//! Transaction submission, finality tracking and history.

pub mod history;
pub mod pending;
#[allow(clippy::module_inception)]
pub mod tracker;

pub use history::TransactionHistory;
pub use pending::{PendingStore, PendingTransaction, TxStatus};
pub use tracker::TransactionTracker;
