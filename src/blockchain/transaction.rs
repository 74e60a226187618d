//! ERC20 call encoding and transfer transaction building.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::blockchain::types::{GasParams, TransferCall};

sol! {
    /// The subset of ERC20 the engine uses.
    #[derive(Debug)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function transfer(address to, uint256 amount) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// ABI-encoded `transfer(recipient, amount_raw)`.
pub fn transfer_calldata(recipient: Address, amount_raw: U256) -> Bytes {
    IERC20::transferCall {
        to: recipient,
        amount: amount_raw,
    }
    .abi_encode()
    .into()
}

/// Read-only `eth_call` request against a token contract.
pub fn token_call<C: SolCall>(token: Address, call: &C) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(token)
        .with_input(call.abi_encode())
}

/// Request used to estimate gas for a transfer; no gas fields set.
pub fn estimate_request(transfer: &TransferCall) -> TransactionRequest {
    TransactionRequest::default()
        .with_from(transfer.from)
        .with_to(transfer.token)
        .with_input(transfer_calldata(transfer.recipient, transfer.amount_raw))
}

/// Fully specified transfer transaction, ready for the signer.
pub fn transfer_request(
    from: Address,
    token: Address,
    recipient: Address,
    amount_raw: U256,
    gas: GasParams,
    chain_id: u64,
) -> TransactionRequest {
    TransactionRequest::default()
        .with_from(from)
        .with_to(token)
        .with_input(transfer_calldata(recipient, amount_raw))
        .with_gas_limit(gas.gas_units)
        .with_gas_price(gas.gas_price_wei)
        .with_chain_id(chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_calldata_layout() {
        let recipient = Address::repeat_byte(0x11);
        let data = transfer_calldata(recipient, U256::from(1000));

        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(&data[16..36], recipient.as_slice());
        assert_eq!(U256::from_be_slice(&data[36..68]), U256::from(1000));
    }

    #[test]
    fn test_transfer_request_carries_quote() {
        let gas = GasParams {
            gas_units: 60_000,
            gas_price_wei: 3_000_000_000,
        };
        let tx = transfer_request(
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0x3d),
            Address::repeat_byte(0x11),
            U256::from(5),
            gas,
            11155111,
        );

        assert_eq!(tx.gas, Some(60_000));
        assert_eq!(tx.gas_price, Some(3_000_000_000));
        assert_eq!(tx.chain_id, Some(11155111));
        assert_eq!(tx.from, Some(Address::repeat_byte(0xaa)));
    }

    #[test]
    fn test_decode_balance_return() {
        let encoded = U256::from(42).to_be_bytes::<32>();
        let decoded = IERC20::balanceOfCall::abi_decode_returns(&encoded).unwrap();
        assert_eq!(decoded, U256::from(42));
    }
}
