// ABI helpers for the ManyChainMultiSig, RBACTimelock and CallProxy contracts

use crate::error::ChainError;
use crate::proposal::Transaction;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};
use regex::Regex;
use std::sync::OnceLock;

// ManyChainMultiSig
pub const SET_ROOT: &str =
    "setRoot(bytes32,uint32,(uint256,address,uint40,uint40,bool),bytes32[],(uint8,bytes32,bytes32)[])";
pub const EXECUTE: &str = "execute((uint256,address,uint40,address,uint256,bytes),bytes32[])";
pub const GET_OP_COUNT: &str = "getOpCount()";
pub const GET_ROOT: &str = "getRoot()";

// RBACTimelock
pub const SCHEDULE_BATCH: &str = "scheduleBatch((address,uint256,bytes)[],bytes32,bytes32,uint256)";
pub const CANCEL: &str = "cancel(bytes32)";
pub const BYPASSER_EXECUTE_BATCH: &str = "bypasserExecuteBatch((address,uint256,bytes)[])";
pub const EXECUTE_BATCH: &str = "executeBatch((address,uint256,bytes)[],bytes32,bytes32)";
pub const IS_OPERATION_READY: &str = "isOperationReady(bytes32)";

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static address pattern"))
}

/// Parses a 0x-prefixed 20 byte hex address (any case, no checksum enforcement).
pub fn parse_address(value: &str) -> Result<Address, ChainError> {
    let value = value.trim();
    if !address_pattern().is_match(value) {
        return Err(ChainError::Encoding(format!("invalid EVM address '{}'", value)));
    }
    let bytes = hex::decode(&value[2..]).map_err(|e| ChainError::Encoding(e.to_string()))?;
    Ok(Address::from_slice(&bytes))
}

/// Native value attached to a call: `additionalFields.value`, a number or a
/// decimal string, zero when absent.
pub fn native_value(fields: &serde_json::Value) -> Result<U256, ChainError> {
    match fields.get("value") {
        None | Some(serde_json::Value::Null) => Ok(U256::zero()),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| ChainError::Encoding(format!("value {} is not a non-negative integer", n))),
        Some(serde_json::Value::String(s)) => U256::from_dec_str(s.trim())
            .map_err(|e| ChainError::Encoding(format!("value '{}' is not a decimal integer: {}", s, e))),
        Some(other) => Err(ChainError::Encoding(format!("unsupported value field {}", other))),
    }
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(tokens));
    data.into()
}

pub fn bytes32(value: H256) -> Token {
    Token::FixedBytes(value.as_bytes().to_vec())
}

/// `(address target, uint256 value, bytes data)[]` for a timelock batch.
pub fn calls_token(transactions: &[Transaction]) -> Result<Token, ChainError> {
    let calls = transactions
        .iter()
        .map(|tx| {
            Ok(Token::Tuple(vec![
                Token::Address(parse_address(&tx.to)?),
                Token::Uint(native_value(&tx.additional_fields)?),
                Token::Bytes(tx.data.to_vec()),
            ]))
        })
        .collect::<Result<Vec<_>, ChainError>>()?;
    Ok(Token::Array(calls))
}

pub fn total_value(transactions: &[Transaction]) -> Result<U256, ChainError> {
    transactions.iter().try_fold(U256::zero(), |acc, tx| {
        let value = native_value(&tx.additional_fields)?;
        acc.checked_add(value).ok_or_else(|| ChainError::Encoding("batch value overflows uint256".to_string()))
    })
}

/// Operation id as RBACTimelock computes it: `keccak256(abi.encode(calls, predecessor, salt))`.
pub fn hash_operation_batch(transactions: &[Transaction], predecessor: H256, salt: H256) -> Result<H256, ChainError> {
    let encoded = abi::encode(&[calls_token(transactions)?, bytes32(predecessor), bytes32(salt)]);
    Ok(H256::from(keccak256(encoded)))
}

pub fn decode_bool(output: &[u8]) -> Result<bool, ChainError> {
    abi::decode(&[ParamType::Bool], output)
        .map_err(|e| ChainError::Encoding(e.to_string()))?
        .pop()
        .and_then(Token::into_bool)
        .ok_or_else(|| ChainError::Encoding("expected bool return".to_string()))
}

pub fn decode_uint(output: &[u8]) -> Result<U256, ChainError> {
    abi::decode(&[ParamType::Uint(256)], output)
        .map_err(|e| ChainError::Encoding(e.to_string()))?
        .pop()
        .and_then(Token::into_uint)
        .ok_or_else(|| ChainError::Encoding("expected uint return".to_string()))
}

/// `getRoot()` returns `(bytes32 root, uint32 validUntil)`.
pub fn decode_root(output: &[u8]) -> Result<(H256, u32), ChainError> {
    let mut tokens = abi::decode(&[ParamType::FixedBytes(32), ParamType::Uint(32)], output)
        .map_err(|e| ChainError::Encoding(e.to_string()))?
        .into_iter();
    let root = tokens.next().and_then(Token::into_fixed_bytes).filter(|bytes| bytes.len() == 32);
    let valid_until = tokens.next().and_then(Token::into_uint);
    match (root, valid_until) {
        (Some(root), Some(valid_until)) if valid_until <= U256::from(u32::MAX) => {
            Ok((H256::from_slice(&root), valid_until.as_u32()))
        }
        _ => Err(ChainError::Encoding("malformed getRoot return".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn addresses_are_validated() {
        assert!(parse_address("0x00000000000000000000000000000000000000aA").is_ok());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("00000000000000000000000000000000000000aa").is_err());
    }

    #[test]
    fn native_value_accepts_numbers_and_decimal_strings() {
        assert_eq!(native_value(&json!(null)).unwrap(), U256::zero());
        assert_eq!(native_value(&json!({"value": 5})).unwrap(), U256::from(5));
        assert_eq!(
            native_value(&json!({"value": "1000000000000000000000"})).unwrap(),
            U256::from_dec_str("1000000000000000000000").unwrap()
        );
        assert!(native_value(&json!({"value": -1})).is_err());
        assert!(native_value(&json!({"value": "0x10"})).is_err());
    }

    #[test]
    fn call_data_starts_with_selector() {
        let data = encode_call(CANCEL, &[bytes32(H256::repeat_byte(1))]);
        assert_eq!(&data[..4], &id(CANCEL)[..]);
        assert_eq!(data.len(), 36);
    }

    #[test]
    fn batch_hash_depends_on_predecessor() {
        let txs = vec![Transaction::new("0x0000000000000000000000000000000000000001", vec![1u8], "T")];
        let a = hash_operation_batch(&txs, H256::zero(), H256::repeat_byte(2)).unwrap();
        let b = hash_operation_batch(&txs, H256::repeat_byte(1), H256::repeat_byte(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decodes_get_root_output() {
        let output = abi::encode(&[bytes32(H256::repeat_byte(4)), Token::Uint(U256::from(99u32))]);
        assert_eq!(decode_root(&output).unwrap(), (H256::repeat_byte(4), 99));
    }
}
