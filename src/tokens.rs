//! Token descriptors, the symbol registry, and exact amount conversion.
//!
//! Human amounts ("12.5") are converted to raw token units with integer
//! arithmetic only; a fractional part longer than the token's decimals is
//! rejected rather than rounded.

use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::schema::TokenConfig;
use crate::error::{WalletError, WalletResult};

/// Largest decimals value whose scale factor `10^decimals` fits in a `U256`.
pub const MAX_DECIMALS: u8 = 77;

/// An ERC20 token the engine can hold and send. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub contract_address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

impl TokenDescriptor {
    /// Convert a human amount into raw units.
    pub fn to_raw(&self, amount: &str) -> WalletResult<U256> {
        parse_amount(amount, self.decimals)
    }

    /// Render raw units as a human amount.
    pub fn format(&self, raw: U256) -> String {
        format_amount(raw, self.decimals)
    }
}

/// Synchronous lookup of configured tokens by symbol (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, TokenDescriptor>,
}

impl TokenRegistry {
    pub fn new(tokens: impl IntoIterator<Item = TokenDescriptor>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| (t.symbol.to_uppercase(), t))
                .collect(),
        }
    }

    /// Build from the `[[tokens]]` configuration tables.
    pub fn from_config(configs: &[TokenConfig]) -> WalletResult<Self> {
        let mut tokens = Vec::with_capacity(configs.len());
        for config in configs {
            if config.decimals > MAX_DECIMALS {
                return Err(WalletError::InvalidAmount(format!(
                    "{} decimals for {} exceeds {}",
                    config.decimals, config.symbol, MAX_DECIMALS
                )));
            }
            let contract_address: Address = config
                .address
                .parse()
                .map_err(|_| WalletError::InvalidAddress(config.address.clone()))?;
            tokens.push(TokenDescriptor {
                contract_address,
                symbol: config.symbol.clone(),
                name: config.name.clone(),
                decimals: config.decimals,
            });
        }
        Ok(Self::new(tokens))
    }

    pub fn get(&self, symbol: &str) -> Option<&TokenDescriptor> {
        self.tokens.get(&symbol.to_uppercase())
    }

    pub fn resolve(&self, symbol: &str) -> WalletResult<TokenDescriptor> {
        self.get(symbol)
            .cloned()
            .ok_or_else(|| WalletError::UnknownToken(symbol.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Parse a positive decimal string into raw units with `decimals` fractional digits.
pub fn parse_amount(amount: &str, decimals: u8) -> WalletResult<U256> {
    let amount = amount.trim();
    let invalid = |reason: &str| WalletError::InvalidAmount(format!("'{}': {}", amount, reason));

    if decimals > MAX_DECIMALS {
        return Err(invalid(&format!("token has more than {} decimals", MAX_DECIMALS)));
    }
    if amount.is_empty() {
        return Err(invalid("empty"));
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid("no digits"));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid("must be a positive decimal number"));
    }
    if frac_part.len() > decimals as usize {
        return Err(invalid(&format!("more than {} decimal places", decimals)));
    }

    let scale = U256::from(10u64).pow(U256::from(decimals));
    let digits = |s: &str| -> WalletResult<U256> {
        if s.is_empty() {
            return Ok(U256::ZERO);
        }
        U256::from_str_radix(s, 10).map_err(|_| invalid("too large"))
    };

    let whole = digits(int_part)?
        .checked_mul(scale)
        .ok_or_else(|| invalid("too large"))?;
    let padded = format!("{:0<width$}", frac_part, width = decimals as usize);
    let fraction = digits(&padded)?;
    let raw = whole.checked_add(fraction).ok_or_else(|| invalid("too large"))?;

    if raw.is_zero() {
        return Err(invalid("must be greater than zero"));
    }
    Ok(raw)
}

/// Render raw units as a decimal string without trailing zeros.
pub fn format_amount(raw: U256, decimals: u8) -> String {
    match format_units(raw, decimals) {
        Ok(formatted) => trim_fraction(formatted),
        Err(_) => raw.to_string(),
    }
}

/// Render a wei amount in gwei.
pub fn format_gwei(wei: u128) -> String {
    format_amount(U256::from(wei), 9)
}

fn trim_fraction(formatted: String) -> String {
    if !formatted.contains('.') {
        return formatted;
    }
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mtk() -> TokenDescriptor {
        TokenDescriptor {
            contract_address: Address::repeat_byte(0x3d),
            symbol: "MTK".to_string(),
            name: "MTK Game Token".to_string(),
            decimals: 18,
        }
    }

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!(parse_amount("10", 0).unwrap(), U256::from(10));
        assert_eq!(parse_amount("1.5", 6).unwrap(), U256::from(1_500_000));
        assert_eq!(parse_amount(".25", 2).unwrap(), U256::from(25));
        assert_eq!(parse_amount("3.", 2).unwrap(), U256::from(300));
    }

    #[test]
    fn test_parse_is_exact_for_eighteen_decimals() {
        // 0.1 + 0.2 style inputs must not drift the way float scaling does
        let raw = mtk().to_raw("0.3").unwrap();
        assert_eq!(raw, U256::from(300_000_000_000_000_000u64));

        let raw = mtk().to_raw("123456789.123456789123456789").unwrap();
        assert_eq!(raw.to_string(), "123456789123456789123456789");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(parse_amount("", 18), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(parse_amount("0", 18), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(parse_amount("0.000", 18), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(parse_amount("-1", 18), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(parse_amount("1e18", 18), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(parse_amount("1.2.3", 18), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(parse_amount(".", 18), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(parse_amount("0.001", 2), Err(WalletError::InvalidAmount(_))));
    }

    #[test]
    fn test_format_trims_trailing_zeros() {
        assert_eq!(format_amount(U256::from(1_500_000), 6), "1.5");
        assert_eq!(format_amount(U256::from(5_000_000), 6), "5");
        assert_eq!(format_amount(U256::ZERO, 18), "0");
        assert_eq!(format_gwei(2_500_000_000), "2.5");
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = TokenRegistry::new(vec![mtk()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("mtk").unwrap().symbol, "MTK");
        assert!(matches!(registry.resolve("UNI"), Err(WalletError::UnknownToken(_))));
    }

    #[test]
    fn test_registry_from_config() {
        let configs = vec![TokenConfig {
            symbol: "LINK".to_string(),
            name: "Chainlink".to_string(),
            address: "0x779877A7B0D9E8603169DdbD7836e478b4624789".to_string(),
            decimals: 18,
        }];
        let registry = TokenRegistry::from_config(&configs).unwrap();
        assert_eq!(registry.resolve("link").unwrap().decimals, 18);

        let bad = vec![TokenConfig {
            address: "0x123".to_string(),
            ..configs[0].clone()
        }];
        assert!(matches!(TokenRegistry::from_config(&bad), Err(WalletError::InvalidAddress(_))));
    }

    #[test]
    fn test_oversized_decimals_are_rejected() {
        assert!(parse_amount("1", MAX_DECIMALS).is_ok());
        assert!(matches!(parse_amount("1", 78), Err(WalletError::InvalidAmount(_))));

        let configs = vec![TokenConfig {
            symbol: "WIDE".to_string(),
            name: "Wide".to_string(),
            address: "0x779877A7B0D9E8603169DdbD7836e478b4624789".to_string(),
            decimals: 200,
        }];
        assert!(matches!(TokenRegistry::from_config(&configs), Err(WalletError::InvalidAmount(_))));
    }
}
