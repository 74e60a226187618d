//! Chain-specific types shared by the capability traits.

use alloy::primitives::{Address, TxHash, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{UNRECOGNIZED_CHAIN_CODE, USER_REJECTED_CODE};

// Re-export BlockchainConfig from config module to avoid duplication
pub use crate::config::schema::BlockchainConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw failure reported by a wallet or ledger capability.
///
/// Mirrors the `{ code, message }` shape wallets report; classification into
/// the engine taxonomy happens in [`crate::error::WalletError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub code: Option<i64>,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// The user declined the request in the wallet.
    pub fn is_user_rejection(&self) -> bool {
        if self.code == Some(USER_REJECTED_CODE) {
            return true;
        }
        let message = self.message.to_lowercase();
        message.contains("user rejected") || message.contains("user denied")
    }

    /// The wallet does not know the requested chain.
    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == Some(UNRECOGNIZED_CHAIN_CODE)
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Result type for capability calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// The parts of a transaction receipt the tracker needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    /// Execution succeeded.
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// A token transfer as the ledger and wallet see it: raw units, no decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCall {
    pub from: Address,
    pub token: Address,
    pub recipient: Address,
    pub amount_raw: U256,
}

/// Gas parameters the wallet signs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_units: u64,
    pub gas_price_wei: u128,
}

/// A decoded ERC20 `Transfer` log touching the watched account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLog {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub transaction_hash: Option<TxHash>,
    pub block_number: Option<u64>,
}

/// A new chain head announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash: B256,
    pub number: Option<u64>,
}

/// Chain parameters passed to the wallet when it must add an unknown network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub native_symbol: String,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl From<&BlockchainConfig> for ChainParams {
    fn from(config: &BlockchainConfig) -> Self {
        let mut rpc_urls = vec![config.rpc_url.clone()];
        rpc_urls.extend(config.failover_urls.iter().cloned());
        Self {
            chain_id: config.chain_id,
            chain_name: config.chain_name.clone(),
            native_symbol: config.native_symbol.clone(),
            rpc_urls,
            block_explorer_urls: config.block_explorer_urls.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(11155111u64);
        assert_eq!(chain_id.0, 11155111);
        assert_eq!(u64::from(chain_id), 11155111);
        assert_eq!(chain_id.to_string(), "11155111");
    }

    #[test]
    fn test_user_rejection_detection() {
        assert!(ProviderError::with_code(4001, "nope").is_user_rejection());
        assert!(ProviderError::new("User denied account authorization").is_user_rejection());
        assert!(!ProviderError::new("nonce too low").is_user_rejection());
        assert!(ProviderError::with_code(4902, "Unrecognized chain ID").is_unrecognized_chain());
    }

    #[test]
    fn test_chain_params_from_config() {
        let config = BlockchainConfig {
            rpc_url: "https://rpc.example".to_string(),
            failover_urls: vec!["https://backup.example".to_string()],
            ..BlockchainConfig::default()
        };
        let params = ChainParams::from(&config);
        assert_eq!(params.chain_id, config.chain_id);
        assert_eq!(params.rpc_urls, vec!["https://rpc.example", "https://backup.example"]);
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::with_code(-32000, "header not found");
        assert_eq!(err.to_string(), "[-32000] header not found");
    }
}
