//! Gas quote with a freshness window.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::blockchain::types::GasParams;
use crate::gas::validation::ValidatedTransfer;
use crate::tokens::{format_amount, format_gwei};

/// Fee quote for one specific transfer in one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GasQuote {
    pub gas_units: u64,
    pub gas_price_wei: u128,
    #[serde(skip)]
    pub computed_at: Instant,
    pub generation: u64,
    pub recipient: Address,
    pub amount_raw: U256,
}

impl GasQuote {
    /// Total fee in wei.
    pub fn fee_wei(&self) -> U256 {
        U256::from(self.gas_units) * U256::from(self.gas_price_wei)
    }

    /// Total fee in whole native coins.
    pub fn fee_native(&self) -> String {
        format_amount(self.fee_wei(), 18)
    }

    pub fn gas_price_gwei(&self) -> String {
        format_gwei(self.gas_price_wei)
    }

    pub fn gas_params(&self) -> GasParams {
        GasParams {
            gas_units: self.gas_units,
            gas_price_wei: self.gas_price_wei,
        }
    }

    pub fn age(&self) -> Duration {
        self.computed_at.elapsed()
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() < window
    }

    /// Whether this quote was computed for `transfer` in `generation`.
    pub fn covers(&self, transfer: &ValidatedTransfer, generation: u64) -> bool {
        self.generation == generation
            && self.recipient == transfer.recipient
            && self.amount_raw == transfer.amount_raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(computed_at: Instant) -> GasQuote {
        GasQuote {
            gas_units: 52_000,
            gas_price_wei: 2_000_000_000,
            computed_at,
            generation: 3,
            recipient: Address::repeat_byte(0x11),
            amount_raw: U256::from(10),
        }
    }

    #[test]
    fn test_fee_display() {
        let q = quote(Instant::now());
        assert_eq!(q.fee_wei(), U256::from(104_000_000_000_000u64));
        assert_eq!(q.fee_native(), "0.000104");
        assert_eq!(q.gas_price_gwei(), "2");
    }

    #[test]
    fn test_freshness_window() {
        let window = Duration::from_secs(30);
        assert!(quote(Instant::now()).is_fresh(window));

        let Some(old) = Instant::now().checked_sub(Duration::from_secs(31)) else {
            return;
        };
        assert!(!quote(old).is_fresh(window));
    }
}
