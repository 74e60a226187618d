//! Capability traits the engine is constructed with.
//!
//! Everything that touches the outside world (the remote ledger and the
//! user's wallet) sits behind one of these traits, injected as a trait object.
//! [`crate::blockchain::BlockchainClient`] and [`crate::blockchain::LocalWallet`]
//! are the real implementations; `blockchain::mock` (behind the `test-util`
//! feature) holds scriptable ones for tests.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast;

use crate::blockchain::types::{
    BlockHeader, ChainParams, GasParams, ProviderError, ProviderResult, TransferCall,
    TransferLog, TxReceipt,
};
use crate::tokens::TokenDescriptor;

/// Stream of new chain heads.
pub type BlockStream = BoxStream<'static, BlockHeader>;

/// Stream of decoded token `Transfer` logs.
pub type TransferLogStream = BoxStream<'static, TransferLog>;

/// Read access to the remote ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Native coin balance in wei.
    async fn native_balance(&self, address: Address) -> ProviderResult<U256>;

    /// Latest block height.
    async fn block_number(&self) -> ProviderResult<u64>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> ProviderResult<u128>;

    /// `balanceOf(owner)` on the token contract, raw units.
    async fn token_balance(&self, token: Address, owner: Address) -> ProviderResult<U256>;

    /// `decimals()` on the token contract.
    async fn token_decimals(&self, token: Address) -> ProviderResult<u8>;

    /// `symbol()` on the token contract.
    async fn token_symbol(&self, token: Address) -> ProviderResult<String>;

    /// Gas units a `transfer` call would consume.
    async fn estimate_transfer_gas(&self, transfer: &TransferCall) -> ProviderResult<u64>;

    /// Receipt for a transaction, `None` while it is not yet mined.
    async fn transaction_receipt(&self, hash: TxHash) -> ProviderResult<Option<TxReceipt>>;

    /// Push channel of new chain heads.
    async fn subscribe_new_blocks(&self) -> ProviderResult<BlockStream>;

    /// Push channel of token `Transfer` logs sent from or to `account`.
    async fn subscribe_transfer_events(
        &self,
        token: Address,
        account: Address,
    ) -> ProviderResult<TransferLogStream>;
}

/// Account or network change announced by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// The user's wallet: holds keys, signs, broadcasts.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for its accounts, prompting the user if needed.
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>>;

    /// Chain the wallet is currently pointed at.
    async fn chain_id(&self) -> ProviderResult<u64>;

    /// Account and chain change notifications.
    fn events(&self) -> broadcast::Receiver<WalletEvent>;

    /// Sign and broadcast an ERC20 `transfer`, returning the transaction hash
    /// as soon as the wallet accepted it.
    async fn send_transfer(
        &self,
        token: Address,
        recipient: Address,
        amount_raw: U256,
        gas: GasParams,
    ) -> ProviderResult<TxHash>;

    /// Point the wallet at another chain.
    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()> {
        Err(ProviderError::new(format!(
            "wallet cannot switch to chain {}",
            chain_id
        )))
    }

    /// Teach the wallet about a chain it does not know.
    async fn add_chain(&self, params: &ChainParams) -> ProviderResult<()> {
        Err(ProviderError::new(format!(
            "wallet cannot add chain {}",
            params.chain_id
        )))
    }

    /// Ask the wallet to display a token. Returns whether the user accepted.
    async fn watch_asset(&self, token: &TokenDescriptor) -> ProviderResult<bool> {
        Err(ProviderError::new(format!(
            "wallet cannot watch asset {}",
            token.symbol
        )))
    }
}
