//! Local-key wallet provider.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables
//! - Keys are never logged or serialized

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::blockchain::capability::{WalletEvent, WalletProvider};
use crate::blockchain::client::provider_error;
use crate::blockchain::transaction::transfer_request;
use crate::blockchain::types::{GasParams, ProviderError, ProviderResult};

/// Environment variable holding the signing key.
pub const PRIVATE_KEY_ENV_VAR: &str = "WALLET_SYNC_PRIVATE_KEY";

/// A single-account wallet that signs with a local key and broadcasts
/// through a JSON-RPC endpoint.
pub struct LocalWallet {
    signer: PrivateKeySigner,
    chain_id: u64,
    provider: Arc<dyn Provider + Send + Sync>,
    events: broadcast::Sender<WalletEvent>,
}

impl LocalWallet {
    /// Create a wallet from a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(private_key_hex: &str, rpc_url: &str, chain_id: u64) -> ProviderResult<Self> {
        let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| ProviderError::new(format!("Invalid private key format: {}", e)))?;
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e| ProviderError::new(format!("Invalid RPC URL '{}': {}", rpc_url, e)))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(url);
        let (events, _) = broadcast::channel(16);

        tracing::info!(address = %signer.address(), chain_id, "Local wallet initialized");

        Ok(Self {
            signer,
            chain_id,
            provider: Arc::new(provider),
            events,
        })
    }

    /// Load the key from `WALLET_SYNC_PRIVATE_KEY`.
    pub fn from_env(rpc_url: &str, chain_id: u64) -> ProviderResult<Self> {
        let private_key = std::env::var(PRIVATE_KEY_ENV_VAR).map_err(|_| {
            ProviderError::new(format!("Environment variable {} not set", PRIVATE_KEY_ENV_VAR))
        })?;
        Self::from_private_key(&private_key, rpc_url, chain_id)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Announce an account or chain change to the engine.
    pub fn inject(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.signer.address())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

#[async_trait]
impl WalletProvider for LocalWallet {
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        Ok(vec![self.signer.address()])
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        Ok(self.chain_id)
    }

    fn events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    async fn send_transfer(
        &self,
        token: Address,
        recipient: Address,
        amount_raw: U256,
        gas: GasParams,
    ) -> ProviderResult<TxHash> {
        let request = transfer_request(
            self.signer.address(),
            token,
            recipient,
            amount_raw,
            gas,
            self.chain_id,
        );
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| provider_error(&e))?;
        let hash = *pending.tx_hash();
        tracing::debug!(%hash, %token, %recipient, "Transfer broadcast");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anvil's first account
    const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const RPC: &str = "http://127.0.0.1:8545";

    #[tokio::test]
    async fn test_single_account_from_key() {
        let wallet = LocalWallet::from_private_key(TEST_PRIVATE_KEY, RPC, 31337).unwrap();
        assert_eq!(
            wallet.address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(wallet.request_accounts().await.unwrap(), vec![wallet.address()]);
        assert_eq!(wallet.chain_id().await.unwrap(), 31337);
    }

    #[test]
    fn test_key_with_0x_prefix() {
        let wallet = LocalWallet::from_private_key(&format!("0x{}", TEST_PRIVATE_KEY), RPC, 1).unwrap();
        assert_eq!(
            wallet.address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_invalid_private_key() {
        let err = LocalWallet::from_private_key("invalid_key", RPC, 1).unwrap_err();
        assert!(err.message.contains("Invalid private key"));
    }

    #[test]
    fn test_injected_events_reach_subscribers() {
        let wallet = LocalWallet::from_private_key(TEST_PRIVATE_KEY, RPC, 1).unwrap();
        let mut events = wallet.events();
        wallet.inject(WalletEvent::ChainChanged(5));
        assert_eq!(events.try_recv().unwrap(), WalletEvent::ChainChanged(5));
    }

    #[tokio::test]
    async fn test_cannot_switch_chain() {
        let wallet = LocalWallet::from_private_key(TEST_PRIVATE_KEY, RPC, 1).unwrap();
        assert!(wallet.switch_chain(5).await.is_err());
    }
}
