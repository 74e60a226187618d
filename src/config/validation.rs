//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (active token exists in the token table)
//! - Validate value ranges (intervals > 0, URLs parse, addresses are hex)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>

use alloy::primitives::Address;
use std::collections::HashSet;

use crate::config::schema::EngineConfig;
use crate::tokens::MAX_DECIMALS;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.blockchain.rpc_url.parse::<url::Url>().is_err() {
        errors.push(ValidationError::new("blockchain.rpc_url", "not a valid URL"));
    }
    for (i, failover) in config.blockchain.failover_urls.iter().enumerate() {
        if failover.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(
                format!("blockchain.failover_urls[{}]", i),
                "not a valid URL",
            ));
        }
    }
    if config.blockchain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("blockchain.rpc_timeout_secs", "must be > 0"));
    }

    if config.session.balance_poll_interval_ms == 0 {
        errors.push(ValidationError::new("session.balance_poll_interval_ms", "must be > 0"));
    }

    if config.gas.freshness_secs == 0 {
        errors.push(ValidationError::new("gas.freshness_secs", "must be > 0"));
    }
    let multiplier = config.gas.gas_price_multiplier;
    if multiplier.is_nan() || multiplier < 1.0 {
        errors.push(ValidationError::new("gas.gas_price_multiplier", "must be >= 1.0"));
    }

    if config.tracking.receipt_poll_interval_ms == 0 {
        errors.push(ValidationError::new("tracking.receipt_poll_interval_ms", "must be > 0"));
    }
    if config.tracking.max_receipt_attempts == 0 {
        errors.push(ValidationError::new("tracking.max_receipt_attempts", "must be > 0"));
    }

    let mut symbols = HashSet::new();
    for (i, token) in config.tokens.iter().enumerate() {
        if token.address.parse::<Address>().is_err() {
            errors.push(ValidationError::new(
                format!("tokens[{}].address", i),
                format!("'{}' is not a contract address", token.address),
            ));
        }
        if token.decimals > MAX_DECIMALS {
            errors.push(ValidationError::new(
                format!("tokens[{}].decimals", i),
                format!("must be <= {}", MAX_DECIMALS),
            ));
        }
        if !symbols.insert(token.symbol.to_uppercase()) {
            errors.push(ValidationError::new(
                format!("tokens[{}].symbol", i),
                format!("duplicate symbol '{}'", token.symbol),
            ));
        }
    }
    if !symbols.contains(&config.active_token.to_uppercase()) {
        errors.push(ValidationError::new(
            "active_token",
            format!("'{}' is not listed in [[tokens]]", config.active_token),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TokenConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = EngineConfig::default();
        config.blockchain.rpc_url = "not a url".to_string();
        config.tracking.max_receipt_attempts = 0;
        config.active_token = "DAI".to_string();
        config.tokens.push(TokenConfig {
            address: "0xnothex".to_string(),
            ..TokenConfig::default()
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"blockchain.rpc_url"));
        assert!(fields.contains(&"tracking.max_receipt_attempts"));
        assert!(fields.contains(&"active_token"));
        assert!(fields.contains(&"tokens[1].address"));
        assert!(fields.contains(&"tokens[1].symbol"));
    }

    #[test]
    fn test_decimals_must_fit_u256_scale() {
        let mut config = EngineConfig::default();
        config.tokens[0].decimals = MAX_DECIMALS;
        assert!(validate_config(&config).is_ok());

        config.tokens[0].decimals = 78;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "tokens[0].decimals");
    }
}
