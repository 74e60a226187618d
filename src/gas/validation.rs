//! Transfer input validation, run before any network call.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::balances::BalanceSnapshot;
use crate::error::{WalletError, WalletResult};
use crate::tokens::TokenDescriptor;

/// A transfer as the user typed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Human amount, e.g. "12.5".
    pub amount: String,
    /// Recipient address, hex.
    pub recipient: String,
}

impl TransferRequest {
    pub fn new(amount: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            recipient: recipient.into(),
        }
    }
}

/// A transfer that passed validation against the token and the last known balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransfer {
    pub amount: String,
    pub amount_raw: U256,
    pub recipient: Address,
    pub token: TokenDescriptor,
}

/// Parse a recipient address. Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_recipient(input: &str) -> WalletResult<Address> {
    let input = input.trim();
    if input.is_empty() {
        return Err(WalletError::InvalidAddress("empty recipient".to_string()));
    }
    let address: Address = input
        .parse()
        .map_err(|_| WalletError::InvalidAddress(input.to_string()))?;

    let hex = input.strip_prefix("0x").unwrap_or(input);
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    if has_upper && has_lower {
        let prefixed = format!("0x{}", hex);
        Address::parse_checksummed(&prefixed, None)
            .map_err(|_| WalletError::InvalidAddress(format!("{} (bad checksum)", input)))?;
    }
    Ok(address)
}

/// Validate amount, recipient and balance, in that order.
///
/// With no balance snapshot the available balance is taken as zero.
pub fn validate_transfer(
    request: &TransferRequest,
    token: &TokenDescriptor,
    balance: Option<&BalanceSnapshot>,
) -> WalletResult<ValidatedTransfer> {
    let amount_raw = token.to_raw(&request.amount)?;
    let recipient = parse_recipient(&request.recipient)?;

    let available = balance.map(|b| b.token_raw).unwrap_or(U256::ZERO);
    if amount_raw > available {
        return Err(WalletError::InsufficientBalance {
            requested: format!("{} {}", token.format(amount_raw), token.symbol),
            available: format!("{} {}", token.format(available), token.symbol),
        });
    }

    Ok(ValidatedTransfer {
        amount: request.amount.trim().to_string(),
        amount_raw,
        recipient,
        token: token.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn token() -> TokenDescriptor {
        TokenDescriptor {
            contract_address: Address::repeat_byte(0x3d),
            symbol: "MTK".to_string(),
            name: "MTK Game Token".to_string(),
            decimals: 0,
        }
    }

    fn balance(raw: u64) -> BalanceSnapshot {
        BalanceSnapshot {
            address: Address::ZERO,
            native_wei: U256::ZERO,
            token_raw: U256::from(raw),
            token_symbol: "MTK".to_string(),
            token_decimals: 0,
            block_number: 1,
            generation: 1,
        }
    }

    #[test]
    fn test_valid_transfer() {
        let request = TransferRequest::new(" 5 ", RECIPIENT);
        let transfer = validate_transfer(&request, &token(), Some(&balance(5))).unwrap();
        assert_eq!(transfer.amount_raw, U256::from(5));
        assert_eq!(transfer.amount, "5");
    }

    #[test]
    fn test_insufficient_balance() {
        let request = TransferRequest::new("10", RECIPIENT);
        let err = validate_transfer(&request, &token(), Some(&balance(5))).unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientBalance {
                requested: "10 MTK".to_string(),
                available: "5 MTK".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_snapshot_counts_as_zero() {
        let request = TransferRequest::new("1", RECIPIENT);
        assert!(matches!(
            validate_transfer(&request, &token(), None),
            Err(WalletError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_amount_checked_before_address() {
        let request = TransferRequest::new("0", "garbage");
        assert!(matches!(
            validate_transfer(&request, &token(), Some(&balance(5))),
            Err(WalletError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_recipient_parsing() {
        assert!(parse_recipient(RECIPIENT).is_ok());
        assert!(parse_recipient("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").is_ok());
        assert!(matches!(
            parse_recipient("0xF39fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            Err(WalletError::InvalidAddress(_))
        ));
        assert!(matches!(parse_recipient("0xabc"), Err(WalletError::InvalidAddress(_))));
        assert!(matches!(parse_recipient(""), Err(WalletError::InvalidAddress(_))));
    }
}
