//! Fee estimation for prospective transfers.
//!
//! # Responsibilities
//! - Validate the transfer locally before touching the network
//! - Query gas units and gas price together
//! - Apply the configured price multiplier and ceiling
//! - Hand out cached quotes only while they are fresh

use arc_swap::ArcSwapOption;
use futures_util::future::{self, TryFutureExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::balances::BalanceSynchronizer;
use crate::blockchain::capability::LedgerClient;
use crate::blockchain::types::TransferCall;
use crate::config::GasConfig;
use crate::error::{WalletError, WalletResult};
use crate::gas::quote::GasQuote;
use crate::gas::validation::{validate_transfer, TransferRequest, ValidatedTransfer};
use crate::observability::metrics;
use crate::session::{SessionState, SessionStore};
use crate::tokens::format_gwei;

const WEI_PER_GWEI: u128 = 1_000_000_000;
const BASIS_POINTS: u128 = 10_000;

/// Scale `price_wei` by `multiplier`, rounded to basis points and applied in integers.
fn buffered_price(price_wei: u128, multiplier: f64) -> u128 {
    let bps = (multiplier * BASIS_POINTS as f64).round().max(0.0) as u128;
    price_wei.saturating_mul(bps) / BASIS_POINTS
}

/// Produces [`GasQuote`]s against the active session.
#[derive(Clone)]
pub struct GasEstimator {
    session: Arc<SessionStore>,
    ledger: Arc<dyn LedgerClient>,
    balances: BalanceSynchronizer,
    config: GasConfig,
    last_quote: Arc<ArcSwapOption<GasQuote>>,
}

impl GasEstimator {
    pub fn new(
        session: Arc<SessionStore>,
        ledger: Arc<dyn LedgerClient>,
        balances: BalanceSynchronizer,
        config: GasConfig,
    ) -> Self {
        Self {
            session,
            ledger,
            balances,
            config,
            last_quote: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.config.freshness_secs)
    }

    /// Validate `request` against the token and the last balance snapshot.
    pub fn validate(&self, request: &TransferRequest) -> WalletResult<ValidatedTransfer> {
        let snapshot = self.balances.snapshot();
        validate_transfer(request, self.balances.token(), snapshot.as_deref())
    }

    /// Validate and quote a transfer for the active session.
    pub async fn estimate(&self, request: &TransferRequest) -> WalletResult<GasQuote> {
        let session = self.session.active()?;
        let transfer = self.validate(request)?;
        self.quote(&session, &transfer).await
    }

    /// Query the ledger for a new quote. Inputs must already be validated.
    pub async fn quote(
        &self,
        session: &SessionState,
        transfer: &ValidatedTransfer,
    ) -> WalletResult<GasQuote> {
        let from = session.address.ok_or(WalletError::NotConnected)?;
        let call = TransferCall {
            from,
            token: transfer.token.contract_address,
            recipient: transfer.recipient,
            amount_raw: transfer.amount_raw,
        };

        let result = future::try_join(
            self.ledger
                .estimate_transfer_gas(&call)
                .map_err(WalletError::from_estimate),
            self.ledger.gas_price().map_err(WalletError::from_estimate),
        )
        .await;

        let (gas_units, reported_price) = match result {
            Ok(values) => values,
            Err(e) => {
                metrics::record_gas_estimate("error");
                tracing::warn!(error = %e, recipient = %transfer.recipient, "Gas estimation failed");
                return Err(e);
            }
        };

        let gas_price_wei = buffered_price(reported_price, self.config.gas_price_multiplier);
        let max_wei = u128::from(self.config.max_gas_price_gwei).saturating_mul(WEI_PER_GWEI);
        if gas_price_wei > max_wei {
            metrics::record_gas_estimate("price_too_high");
            return Err(WalletError::GasPriceTooHigh {
                current_gwei: format_gwei(gas_price_wei),
                max_gwei: self.config.max_gas_price_gwei,
            });
        }

        if !self.session.is_current(session.generation) {
            metrics::record_stale_result("gas");
            return Err(WalletError::SessionSuperseded);
        }

        let quote = GasQuote {
            gas_units,
            gas_price_wei,
            computed_at: Instant::now(),
            generation: session.generation,
            recipient: transfer.recipient,
            amount_raw: transfer.amount_raw,
        };
        self.last_quote.store(Some(Arc::new(quote.clone())));
        metrics::record_gas_estimate("ok");
        tracing::debug!(
            gas_units,
            gas_price_gwei = %quote.gas_price_gwei(),
            fee = %quote.fee_native(),
            "Gas quote computed"
        );
        Ok(quote)
    }

    /// A quote usable for submitting `transfer` right now.
    ///
    /// Prefers `candidate`, then the last computed quote; recomputes when
    /// neither is fresh and computed for this transfer in this session.
    pub async fn fresh_quote(
        &self,
        session: &SessionState,
        transfer: &ValidatedTransfer,
        candidate: Option<GasQuote>,
    ) -> WalletResult<GasQuote> {
        let window = self.freshness_window();
        let usable = |q: &GasQuote| q.is_fresh(window) && q.covers(transfer, session.generation);

        if let Some(quote) = candidate.filter(|q| usable(q)) {
            return Ok(quote);
        }
        if let Some(quote) = self.last_quote.load_full().filter(|q| usable(q)) {
            return Ok((*quote).clone());
        }
        tracing::debug!("No fresh quote for transfer, re-estimating");
        self.quote(session, transfer).await
    }

    /// Last computed quote, fresh or not.
    pub fn last_quote(&self) -> Option<Arc<GasQuote>> {
        self.last_quote.load_full()
    }

    pub fn clear(&self) {
        self.last_quote.store(None);
    }
}
