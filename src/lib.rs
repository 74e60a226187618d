//! Wallet session and transaction lifecycle engine.
//!
//! Keeps a wallet session consistent with a remote ledger: connects to a
//! wallet, synchronizes native and token balances, quotes gas for ERC20
//! transfers, submits them and tracks each to finality. All outside access
//! goes through injected [`blockchain::LedgerClient`] and
//! [`blockchain::WalletProvider`] trait objects.

// Core state
pub mod error;
pub mod events;
pub mod session;
pub mod subscriptions;

// Ledger-facing components
pub mod balances;
pub mod blockchain;
pub mod gas;
pub mod tokens;
pub mod tracker;

// Facade
pub mod engine;

// Cross-cutting concerns
pub mod config;
pub mod notify;
pub mod observability;

pub use config::schema::EngineConfig;
pub use engine::WalletEngine;
pub use error::{WalletError, WalletResult};
pub use events::EngineEvent;
