//! Wallet balance synchronization.

pub mod synchronizer;

pub use synchronizer::{BalanceSnapshot, BalanceSynchronizer, RefreshResult};
