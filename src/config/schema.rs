//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON-RPC ledger connection.
    pub blockchain: BlockchainConfig,

    /// Session behaviour (expected network, balance polling).
    pub session: SessionConfig,

    /// Gas quoting.
    pub gas: GasConfig,

    /// Transaction tracking.
    pub tracking: TrackingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Known tokens.
    pub tokens: Vec<TokenConfig>,

    /// Symbol of the token the engine holds and sends.
    pub active_token: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            blockchain: BlockchainConfig::default(),
            session: SessionConfig::default(),
            gas: GasConfig::default(),
            tracking: TrackingConfig::default(),
            observability: ObservabilityConfig::default(),
            tokens: vec![TokenConfig::default()],
            active_token: "MTK".to_string(),
        }
    }
}

/// Ledger (JSON-RPC) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Chain ID the RPC endpoint serves (e.g., 11155111 for Sepolia).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Human name of the chain, used when asking a wallet to add it.
    pub chain_name: String,

    /// Native coin symbol.
    pub native_symbol: String,

    /// Block explorer base URLs.
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 11155111,
            rpc_timeout_secs: 10,
            chain_name: "Sepolia Test Network".to_string(),
            native_symbol: "ETH".to_string(),
            block_explorer_urls: vec!["https://sepolia.etherscan.io".to_string()],
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Chain the user is expected to be on; a mismatch produces a warning.
    pub expected_chain_id: Option<u64>,

    /// Interval between timer-driven balance refreshes in milliseconds.
    pub balance_poll_interval_ms: u64,

    /// Also refresh balances on every new block.
    pub refresh_on_new_blocks: bool,

    /// Also refresh balances on token `Transfer` events touching the account.
    pub refresh_on_transfer_events: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_chain_id: Some(11155111),
            balance_poll_interval_ms: 15_000,
            refresh_on_new_blocks: true,
            refresh_on_transfer_events: true,
        }
    }
}

/// Gas quoting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GasConfig {
    /// How long a quote stays usable for submission, in seconds.
    pub freshness_secs: u64,

    /// Gas price multiplier (1.0 = as reported, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            freshness_secs: 30,
            gas_price_multiplier: 1.0,
            max_gas_price_gwei: 500,
        }
    }
}

/// Transaction tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Receipt polling interval in milliseconds.
    pub receipt_poll_interval_ms: u64,

    /// Receipt polls before tracking is abandoned.
    pub max_receipt_attempts: u32,

    /// Reject a submit identical to a transfer that is still pending.
    pub reject_duplicate_submissions: bool,

    /// Number of transfers kept in the history.
    pub history_limit: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            receipt_poll_interval_ms: 1_000,
            max_receipt_attempts: 30,
            reject_duplicate_submissions: false,
            history_limit: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// One `[[tokens]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub name: String,
    /// Contract address, hex.
    pub address: String,
    pub decimals: u8,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            symbol: "MTK".to_string(),
            name: "MTK Game Token".to_string(),
            address: "0x3D6Eb3Fc92C799CB6b8716c5c8E5f8A78eFE8A43".to_string(),
            decimals: 18,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.blockchain.rpc_timeout_secs, 10);
        assert_eq!(config.tracking.max_receipt_attempts, 30);
        assert_eq!(config.tracking.history_limit, 10);
        assert!(!config.tracking.reject_duplicate_submissions);
        assert_eq!(config.active_token, "MTK");
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            active_token = "LINK"

            [blockchain]
            rpc_url = "https://rpc.sepolia.org"

            [[tokens]]
            symbol = "LINK"
            name = "Chainlink"
            address = "0x779877A7B0D9E8603169DdbD7836e478b4624789"
            decimals = 18
            "#,
        )
        .unwrap();

        assert_eq!(config.blockchain.rpc_url, "https://rpc.sepolia.org");
        assert_eq!(config.blockchain.chain_id, 11155111);
        assert_eq!(config.gas.freshness_secs, 30);
        assert_eq!(config.tokens.len(), 1);
        assert_eq!(config.tokens[0].symbol, "LINK");
    }
}
