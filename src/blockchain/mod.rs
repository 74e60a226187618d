//! Ledger and wallet integration.
//!
//! # Data Flow
//! ```text
//! Environment Variables (private key) + [blockchain] config
//!     → capability.rs (LedgerClient / WalletProvider traits)
//!     → client.rs (JSON-RPC ledger reads with timeouts and failover)
//!     → wallet.rs (local-key signing and broadcast)
//!     → transaction.rs (ERC20 encoding, transfer requests)
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod capability;
pub mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use capability::{LedgerClient, WalletEvent, WalletProvider};
pub use client::BlockchainClient;
pub use types::{BlockchainConfig, ChainId, ChainParams, ProviderError, ProviderResult};
pub use wallet::LocalWallet;
