//! Error taxonomy surfaced by the engine.
//!
//! Wallet and ledger capabilities fail with a raw [`ProviderError`] (code +
//! message). Each call site classifies that into a [`WalletError`] with the
//! helper matching its context, so "insufficient funds" means something
//! different during estimation than during a balance read.

use thiserror::Error;

use crate::blockchain::types::ProviderError;

/// EIP-1193 code for a request the user declined in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;

/// EIP-1193 code for a chain the wallet does not know about.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// Errors surfaced by engine operations.
///
/// `Clone` so that coalesced requests can hand the same failure to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    /// No wallet capability was injected.
    #[error("No wallet provider available")]
    ProviderUnavailable,

    /// The wallet returned zero accounts.
    #[error("Wallet returned no accounts")]
    NoAccounts,

    /// The user declined the request in the wallet.
    #[error("Request rejected by user")]
    UserRejected,

    /// Recipient is not a well-formed address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Amount is not a positive number representable with the token decimals.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount exceeds the last known wallet balance.
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: String, available: String },

    /// Not enough native coin to pay for gas.
    #[error("Insufficient native balance for gas: {0}")]
    InsufficientGas(String),

    /// The transfer would revert on-chain.
    #[error("Execution reverted: {0}")]
    RevertedExecution(String),

    /// Transient network or RPC failure.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Tracking gave up before a receipt appeared. The transfer may still be mined.
    #[error("Transaction tracking timed out after {0} attempts")]
    TimedOut(u32),

    /// Gas estimation failed for an unclassified reason.
    #[error("Gas estimation failed: {0}")]
    EstimationFailed(String),

    /// Operation needs a connected session.
    #[error("Wallet not connected")]
    NotConnected,

    /// The session changed while the operation was in flight.
    #[error("Session changed while the request was in flight")]
    SessionSuperseded,

    /// Gas price exceeded the configured ceiling.
    #[error("Gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: String, max_gwei: u64 },

    /// An identical transfer is still pending.
    #[error("An identical transfer is already pending: {0}")]
    DuplicateSubmission(String),

    /// Token symbol is not in the registry.
    #[error("Unknown token: {0}")]
    UnknownToken(String),
}

/// Result type for engine operations.
pub type WalletResult<T> = Result<T, WalletError>;

impl WalletError {
    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WalletError::NetworkError(_))
    }

    /// Classify a failure of an account or chain request.
    pub fn from_connect(err: ProviderError) -> Self {
        if err.is_user_rejection() {
            WalletError::UserRejected
        } else {
            WalletError::NetworkError(err.message)
        }
    }

    /// Classify a failure of a gas estimate call.
    pub fn from_estimate(err: ProviderError) -> Self {
        let message = err.message.to_lowercase();
        if message.contains("insufficient funds") {
            WalletError::InsufficientGas(err.message)
        } else if message.contains("revert") || message.contains("exceeds balance") {
            WalletError::RevertedExecution(err.message)
        } else {
            WalletError::EstimationFailed(err.message)
        }
    }

    /// Classify a failure of a sign-and-broadcast request.
    pub fn from_send(err: ProviderError) -> Self {
        if err.is_user_rejection() {
            return WalletError::UserRejected;
        }
        let message = err.message.to_lowercase();
        if message.contains("insufficient funds") {
            WalletError::InsufficientGas(err.message)
        } else if message.contains("revert") {
            WalletError::RevertedExecution(err.message)
        } else {
            WalletError::NetworkError(err.message)
        }
    }

    /// Classify a failure of a plain ledger read.
    pub fn from_ledger(err: ProviderError) -> Self {
        WalletError::NetworkError(err.message)
    }
}
