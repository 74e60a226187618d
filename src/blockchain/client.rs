//! JSON-RPC ledger client with timeout and failover.
//!
//! # Responsibilities
//! - Connect to the primary and failover JSON-RPC endpoints
//! - Query balances, gas, receipts and ERC20 token state
//! - Expose new blocks and token `Transfer` logs as polled streams
//! - Try the next endpoint on timeouts and transport errors

use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::Filter;
use alloy::sol_types::{SolCall, SolEvent};
use alloy::transports::{TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::capability::{BlockStream, LedgerClient, TransferLogStream};
use crate::blockchain::transaction::{estimate_request, token_call, IERC20};
use crate::blockchain::types::{
    BlockHeader, BlockchainConfig, ChainId, ProviderError, ProviderResult, TransferCall,
    TransferLog, TxReceipt,
};

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// Classify an alloy transport error. JSON-RPC error responses keep their code.
pub(crate) fn provider_error(err: &TransportError) -> ProviderError {
    match err.as_error_resp() {
        Some(payload) => ProviderError::with_code(payload.code, payload.message.to_string()),
        None => ProviderError::new(err.to_string()),
    }
}

/// Ledger client over one or more HTTP endpoints.
#[derive(Clone)]
pub struct BlockchainClient {
    /// Primary first, then failovers in configured order.
    providers: Vec<DynProvider>,
    config: BlockchainConfig,
    timeout_duration: Duration,
}

impl BlockchainClient {
    /// Build the client. Fails only on an invalid primary URL; an unreachable
    /// or mismatched endpoint is logged and tolerated.
    pub async fn new(config: BlockchainConfig) -> ProviderResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers: Vec<DynProvider> = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            ProviderError::new(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as DynProvider);

        for url_str in &config.failover_urls {
            match url_str.parse::<url::Url>() {
                Ok(url) => providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let client = Self {
            providers,
            config: config.clone(),
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => tracing::info!(
                rpc_url = %config.rpc_url,
                chain_id = config.chain_id,
                endpoints = client.providers.len(),
                "Ledger client initialized"
            ),
            Err(e) => tracing::warn!(error = %e, "Ledger client initialized but chain verification failed"),
        }

        Ok(client)
    }

    /// Check that the endpoint serves the configured chain.
    pub async fn verify_chain_id(&self) -> ProviderResult<()> {
        let actual = self.chain_id().await?;
        if actual.0 != self.config.chain_id {
            return Err(ProviderError::new(format!(
                "Chain ID mismatch: expected {}, got {}",
                self.config.chain_id, actual
            )));
        }
        Ok(())
    }

    pub async fn chain_id(&self) -> ProviderResult<ChainId> {
        self.with_failover("eth_chainId", |p| async move { p.get_chain_id().await })
            .await
            .map(ChainId)
    }

    pub fn config(&self) -> &BlockchainConfig {
        &self.config
    }

    /// Run `op` against each endpoint in turn.
    ///
    /// A JSON-RPC error response is an answer, not an outage, and is returned
    /// as-is. Timeouts and transport failures move on to the next endpoint.
    async fn with_failover<T, F, Fut>(&self, method: &'static str, op: F) -> ProviderResult<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, op(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) if e.as_error_resp().is_some() => return Err(provider_error(&e)),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, method, error = %e, "RPC error, trying next provider")
                }
                Err(_) => tracing::warn!(provider_idx = i, method, "RPC timeout, trying next provider"),
            }
        }
        Err(ProviderError::new(format!("All RPC providers failed for {}", method)))
    }

    async fn call_token<C>(&self, token: Address, call: C) -> ProviderResult<C::Return>
    where
        C: SolCall + Send + Sync,
    {
        let request = token_call(token, &call);
        let output = self
            .with_failover("eth_call", |p| {
                let request = request.clone();
                async move { p.call(request).await }
            })
            .await?;
        C::abi_decode_returns(&output)
            .map_err(|e| ProviderError::new(format!("Undecodable {} return: {}", C::SIGNATURE, e)))
    }
}

#[async_trait]
impl LedgerClient for BlockchainClient {
    async fn native_balance(&self, address: Address) -> ProviderResult<U256> {
        self.with_failover("eth_getBalance", |p| async move { p.get_balance(address).await })
            .await
    }

    async fn block_number(&self) -> ProviderResult<u64> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
    }

    async fn gas_price(&self) -> ProviderResult<u128> {
        self.with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> ProviderResult<U256> {
        self.call_token(token, IERC20::balanceOfCall { account: owner })
            .await
    }

    async fn token_decimals(&self, token: Address) -> ProviderResult<u8> {
        self.call_token(token, IERC20::decimalsCall {}).await
    }

    async fn token_symbol(&self, token: Address) -> ProviderResult<String> {
        self.call_token(token, IERC20::symbolCall {}).await
    }

    async fn estimate_transfer_gas(&self, transfer: &TransferCall) -> ProviderResult<u64> {
        let request = estimate_request(transfer);
        self.with_failover("eth_estimateGas", |p| {
            let request = request.clone();
            async move { p.estimate_gas(request).await }
        })
        .await
    }

    async fn transaction_receipt(&self, hash: TxHash) -> ProviderResult<Option<TxReceipt>> {
        let receipt = self
            .with_failover("eth_getTransactionReceipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;
        Ok(receipt.map(|r| TxReceipt {
            transaction_hash: r.transaction_hash,
            success: r.status(),
            block_number: r.block_number,
            gas_used: r.gas_used,
        }))
    }

    async fn subscribe_new_blocks(&self) -> ProviderResult<BlockStream> {
        let poller = self
            .with_failover("eth_newBlockFilter", |p| async move { p.watch_blocks().await })
            .await?;
        let headers = poller
            .into_stream()
            .flat_map(stream::iter)
            .map(|hash| BlockHeader { hash, number: None })
            .boxed();
        Ok(headers)
    }

    async fn subscribe_transfer_events(
        &self,
        token: Address,
        account: Address,
    ) -> ProviderResult<TransferLogStream> {
        let filter = Filter::new()
            .address(token)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH);
        let poller = self
            .with_failover("eth_newFilter", |p| {
                let filter = filter.clone();
                async move { p.watch_logs(&filter).await }
            })
            .await?;
        let logs = poller
            .into_stream()
            .flat_map(stream::iter)
            .filter_map(move |log| {
                let decoded = log.log_decode::<IERC20::Transfer>().ok().and_then(|decoded| {
                    let event = &decoded.inner;
                    (event.from == account || event.to == account).then(|| TransferLog {
                        from: event.from,
                        to: event.to,
                        value: event.value,
                        transaction_hash: decoded.transaction_hash,
                        block_number: decoded.block_number,
                    })
                });
                async move { decoded }
            })
            .boxed();
        Ok(logs)
    }
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("endpoints", &self.providers.len())
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}
