//! Scriptable in-memory capabilities for deterministic testing.
//!
//! [`MockLedger`] keeps balances, receipts and push channels in memory and
//! counts every call so tests can assert on network traffic. [`MockWallet`]
//! returns scripted hashes or errors and can emit account/chain events.

use alloy::primitives::{keccak256, Address, TxHash, U256};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::blockchain::capability::{
    BlockStream, LedgerClient, TransferLogStream, WalletEvent, WalletProvider,
};
use crate::blockchain::types::{
    BlockHeader, ChainParams, GasParams, ProviderError, ProviderResult, TransferCall,
    TransferLog, TxReceipt,
};
use crate::notify::{NotificationKind, Notifier};
use crate::tokens::TokenDescriptor;

fn broadcast_stream<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
) -> futures_util::stream::BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

struct LedgerState {
    native_balance: U256,
    token_balance: U256,
    block_number: u64,
    gas_price: u128,
    gas_units: u64,
    token_decimals: u8,
    token_symbol: String,
    receipts: HashMap<TxHash, TxReceipt>,
    read_delay: Duration,
    read_failure: Option<String>,
    estimate_failure: Option<ProviderError>,
}

struct LedgerInner {
    account: Address,
    state: Mutex<LedgerState>,
    blocks: broadcast::Sender<BlockHeader>,
    transfers: broadcast::Sender<TransferLog>,
    balance_fetches: AtomicUsize,
    estimate_calls: AtomicUsize,
    gas_price_calls: AtomicUsize,
    receipt_queries: AtomicUsize,
}

/// In-memory ledger for one account and one token.
#[derive(Clone)]
pub struct MockLedger {
    inner: Arc<LedgerInner>,
}

impl MockLedger {
    pub fn new() -> Self {
        let (blocks, _) = broadcast::channel(64);
        let (transfers, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(LedgerInner {
                account: Address::repeat_byte(0xaa),
                state: Mutex::new(LedgerState {
                    native_balance: U256::from(1_000_000_000_000_000_000u128),
                    token_balance: U256::ZERO,
                    block_number: 1,
                    gas_price: 2_000_000_000,
                    gas_units: 52_000,
                    token_decimals: 18,
                    token_symbol: "MTK".to_string(),
                    receipts: HashMap::new(),
                    read_delay: Duration::ZERO,
                    read_failure: None,
                    estimate_failure: None,
                }),
                blocks,
                transfers,
                balance_fetches: AtomicUsize::new(0),
                estimate_calls: AtomicUsize::new(0),
                gas_price_calls: AtomicUsize::new(0),
                receipt_queries: AtomicUsize::new(0),
            }),
        }
    }

    /// The account whose balances this ledger tracks.
    pub fn account(&self) -> Address {
        self.inner.account
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.inner.state.lock()
    }

    pub fn set_native_balance(&self, wei: U256) {
        self.state().native_balance = wei;
    }

    pub fn set_token_balance(&self, raw: U256) {
        self.state().token_balance = raw;
    }

    pub fn token_balance(&self) -> U256 {
        self.state().token_balance
    }

    pub fn set_block_number(&self, number: u64) {
        self.state().block_number = number;
    }

    pub fn set_gas(&self, gas_units: u64, gas_price: u128) {
        let mut state = self.state();
        state.gas_units = gas_units;
        state.gas_price = gas_price;
    }

    pub fn set_token_metadata(&self, decimals: u8, symbol: &str) {
        let mut state = self.state();
        state.token_decimals = decimals;
        state.token_symbol = symbol.to_string();
    }

    /// Delay every balance read by `delay`. The value is taken when the
    /// call is made, so a delayed read can report a balance that has since
    /// changed.
    pub fn set_read_delay(&self, delay: Duration) {
        self.state().read_delay = delay;
    }

    /// Make every balance read fail with `message`.
    pub fn fail_reads(&self, message: &str) {
        self.state().read_failure = Some(message.to_string());
    }

    pub fn fail_estimates(&self, error: ProviderError) {
        self.state().estimate_failure = Some(error);
    }

    /// Mine `hash`: publish its receipt and, on success, move `amount_raw`
    /// out of the account.
    pub fn mine_transfer(&self, hash: TxHash, amount_raw: U256, success: bool) {
        let mut state = self.state();
        state.block_number += 1;
        if success {
            state.token_balance = state.token_balance.saturating_sub(amount_raw);
        }
        let receipt = TxReceipt {
            transaction_hash: hash,
            success,
            block_number: Some(state.block_number),
            gas_used: state.gas_units,
        };
        state.receipts.insert(hash, receipt);
    }

    /// Announce a new chain head on the push channel.
    pub fn push_block(&self, number: u64) {
        self.state().block_number = number;
        let _ = self.inner.blocks.send(BlockHeader {
            hash: keccak256(number.to_be_bytes()),
            number: Some(number),
        });
    }

    /// Announce a token transfer on the push channel.
    pub fn push_transfer(&self, log: TransferLog) {
        let _ = self.inner.transfers.send(log);
    }

    /// Number of balance fetches (one per native balance read).
    pub fn balance_fetches(&self) -> usize {
        self.inner.balance_fetches.load(Ordering::SeqCst)
    }

    pub fn estimate_calls(&self) -> usize {
        self.inner.estimate_calls.load(Ordering::SeqCst)
    }

    pub fn gas_price_calls(&self) -> usize {
        self.inner.gas_price_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_queries(&self) -> usize {
        self.inner.receipt_queries.load(Ordering::SeqCst)
    }

    async fn read<T: Send>(&self, f: impl FnOnce(&LedgerState) -> T) -> ProviderResult<T> {
        let (delay, outcome) = {
            let state = self.state();
            let outcome = match &state.read_failure {
                Some(message) => Err(ProviderError::new(message.clone())),
                None => Ok(f(&state)),
            };
            (state.read_delay, outcome)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn native_balance(&self, _address: Address) -> ProviderResult<U256> {
        self.inner.balance_fetches.fetch_add(1, Ordering::SeqCst);
        self.read(|s| s.native_balance).await
    }

    async fn block_number(&self) -> ProviderResult<u64> {
        self.read(|s| s.block_number).await
    }

    async fn gas_price(&self) -> ProviderResult<u128> {
        self.inner.gas_price_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().gas_price)
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> ProviderResult<U256> {
        self.read(|s| s.token_balance).await
    }

    async fn token_decimals(&self, _token: Address) -> ProviderResult<u8> {
        Ok(self.state().token_decimals)
    }

    async fn token_symbol(&self, _token: Address) -> ProviderResult<String> {
        Ok(self.state().token_symbol.clone())
    }

    async fn estimate_transfer_gas(&self, _transfer: &TransferCall) -> ProviderResult<u64> {
        self.inner.estimate_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        match &state.estimate_failure {
            Some(err) => Err(err.clone()),
            None => Ok(state.gas_units),
        }
    }

    async fn transaction_receipt(&self, hash: TxHash) -> ProviderResult<Option<TxReceipt>> {
        self.inner.receipt_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().receipts.get(&hash).copied())
    }

    async fn subscribe_new_blocks(&self) -> ProviderResult<BlockStream> {
        Ok(broadcast_stream(self.inner.blocks.subscribe()))
    }

    async fn subscribe_transfer_events(
        &self,
        _token: Address,
        account: Address,
    ) -> ProviderResult<TransferLogStream> {
        let logs = broadcast_stream(self.inner.transfers.subscribe())
            .filter(move |log| {
                let relevant = log.from == account || log.to == account;
                async move { relevant }
            })
            .boxed();
        Ok(logs)
    }
}

/// A transfer the mock wallet was asked to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransfer {
    pub hash: TxHash,
    pub token: Address,
    pub recipient: Address,
    pub amount_raw: U256,
    pub gas: GasParams,
}

struct WalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    known_chains: HashSet<u64>,
    account_delay: Duration,
    account_failure: Option<ProviderError>,
    send_script: VecDeque<ProviderResult<TxHash>>,
    sent: Vec<SentTransfer>,
}

struct WalletInner {
    state: Mutex<WalletState>,
    events: broadcast::Sender<WalletEvent>,
    account_requests: AtomicUsize,
    next_nonce: AtomicU64,
}

/// Wallet with scripted responses.
#[derive(Clone)]
pub struct MockWallet {
    inner: Arc<WalletInner>,
}

impl MockWallet {
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(WalletInner {
                state: Mutex::new(WalletState {
                    accounts,
                    chain_id,
                    known_chains: HashSet::from([chain_id]),
                    account_delay: Duration::ZERO,
                    account_failure: None,
                    send_script: VecDeque::new(),
                    sent: Vec::new(),
                }),
                events,
                account_requests: AtomicUsize::new(0),
                next_nonce: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        self.inner.state.lock()
    }

    pub fn set_account_delay(&self, delay: Duration) {
        self.state().account_delay = delay;
    }

    pub fn fail_account_requests(&self, error: ProviderError) {
        self.state().account_failure = Some(error);
    }

    /// Queue the outcome of the next `send_transfer` call.
    pub fn script_send(&self, result: ProviderResult<TxHash>) {
        self.state().send_script.push_back(result);
    }

    pub fn sent(&self) -> Vec<SentTransfer> {
        self.state().sent.clone()
    }

    pub fn account_requests(&self) -> usize {
        self.inner.account_requests.load(Ordering::SeqCst)
    }

    pub fn chain(&self) -> u64 {
        self.state().chain_id
    }

    /// Switch accounts and announce it.
    pub fn emit_accounts_changed(&self, accounts: Vec<Address>) {
        self.state().accounts = accounts.clone();
        let _ = self.inner.events.send(WalletEvent::AccountsChanged(accounts));
    }

    /// Switch chains and announce it.
    pub fn emit_chain_changed(&self, chain_id: u64) {
        self.state().chain_id = chain_id;
        let _ = self.inner.events.send(WalletEvent::ChainChanged(chain_id));
    }

    fn next_hash(&self) -> TxHash {
        let nonce = self.inner.next_nonce.fetch_add(1, Ordering::SeqCst);
        keccak256(nonce.to_be_bytes())
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        self.inner.account_requests.fetch_add(1, Ordering::SeqCst);
        let (delay, failure) = {
            let state = self.state();
            (state.account_delay, state.account_failure.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(self.state().accounts.clone()),
        }
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        Ok(self.state().chain_id)
    }

    fn events(&self) -> broadcast::Receiver<WalletEvent> {
        self.inner.events.subscribe()
    }

    async fn send_transfer(
        &self,
        token: Address,
        recipient: Address,
        amount_raw: U256,
        gas: GasParams,
    ) -> ProviderResult<TxHash> {
        let scripted = self.state().send_script.pop_front();
        let hash = match scripted {
            Some(result) => result?,
            None => self.next_hash(),
        };
        self.state().sent.push(SentTransfer {
            hash,
            token,
            recipient,
            amount_raw,
            gas,
        });
        Ok(hash)
    }

    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()> {
        if !self.state().known_chains.contains(&chain_id) {
            return Err(ProviderError::with_code(
                crate::error::UNRECOGNIZED_CHAIN_CODE,
                format!("Unrecognized chain ID {}", chain_id),
            ));
        }
        self.emit_chain_changed(chain_id);
        Ok(())
    }

    async fn add_chain(&self, params: &ChainParams) -> ProviderResult<()> {
        self.state().known_chains.insert(params.chain_id);
        Ok(())
    }

    async fn watch_asset(&self, _token: &TokenDescriptor) -> ProviderResult<bool> {
        Ok(true)
    }
}

/// Notifier that remembers every message.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(String, NotificationKind)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, NotificationKind)> {
        self.messages.lock().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.messages().iter().filter(|(_, k)| *k == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, kind: NotificationKind) {
        self.messages.lock().push((message.to_string(), kind));
    }
}
