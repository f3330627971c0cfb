use super::abi::{bytes32, native_value, parse_address};
use crate::error::ChainError;
use crate::proposal::{ChainMetadata, ChainSelector, Operation};
use ethers::abi::{self, Token};
use ethers::types::{H256, U256};
use ethers::utils::keccak256;

const METADATA_DOMAIN_SEPARATOR: &[u8] = b"MANY_CHAIN_MULTI_SIG_DOMAIN_SEPARATOR_METADATA";
const OP_DOMAIN_SEPARATOR: &[u8] = b"MANY_CHAIN_MULTI_SIG_DOMAIN_SEPARATOR_OP";

/// Leaf encoding of ManyChainMultiSig: `keccak256(abi.encode(separator, struct))`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmEncoder {
    pub selector: ChainSelector,
    pub chain_id: u64,
    pub tx_count: u64,
    pub override_previous_root: bool,
}

impl EvmEncoder {
    pub fn new(selector: ChainSelector, chain_id: u64, tx_count: u64, override_previous_root: bool) -> Self {
        EvmEncoder { selector, chain_id, tx_count, override_previous_root }
    }

    /// `RootMetadata(chainId, multiSig, preOpCount, postOpCount, overridePreviousRoot)`
    pub fn metadata_token(&self, metadata: &ChainMetadata) -> Result<Token, ChainError> {
        let pre = metadata.starting_op_count;
        let post = pre
            .checked_add(self.tx_count)
            .ok_or_else(|| ChainError::Encoding("post op count overflows".to_string()))?;
        Ok(Token::Tuple(vec![
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(parse_address(&metadata.mcm_address)?),
            Token::Uint(U256::from(pre)),
            Token::Uint(U256::from(post)),
            Token::Bool(self.override_previous_root),
        ]))
    }

    /// `Op(chainId, multiSig, nonce, to, value, data)`
    pub fn operation_token(&self, metadata: &ChainMetadata, nonce: u64, op: &Operation) -> Result<Token, ChainError> {
        let tx = &op.transaction;
        Ok(Token::Tuple(vec![
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(parse_address(&metadata.mcm_address)?),
            Token::Uint(U256::from(nonce)),
            Token::Address(parse_address(&tx.to)?),
            Token::Uint(native_value(&tx.additional_fields)?),
            Token::Bytes(tx.data.to_vec()),
        ]))
    }

    pub fn hash_metadata(&self, metadata: &ChainMetadata) -> Result<H256, ChainError> {
        let separator = H256::from(keccak256(METADATA_DOMAIN_SEPARATOR));
        let encoded = abi::encode(&[bytes32(separator), self.metadata_token(metadata)?]);
        Ok(H256::from(keccak256(encoded)))
    }

    pub fn hash_operation(&self, metadata: &ChainMetadata, nonce: u64, op: &Operation) -> Result<H256, ChainError> {
        let separator = H256::from(keccak256(OP_DOMAIN_SEPARATOR));
        let encoded = abi::encode(&[bytes32(separator), self.operation_token(metadata, nonce, op)?]);
        Ok(H256::from(keccak256(encoded)))
    }
}
