use super::abi::{self, bytes32, encode_call, parse_address};
use super::{EvmChain, EvmEncoder};
use crate::chain::interface::{ExecuteRequest, Executor, Inspector, SetRootRequest, TransactionResult};
use crate::context::ExecContext;
use crate::error::ChainError;
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{H256, U256};
use std::sync::Arc;

/// Reads `getOpCount()` / `getRoot()` from a ManyChainMultiSig.
#[derive(Debug)]
pub struct EvmInspector {
    chain: Arc<EvmChain>,
}

impl EvmInspector {
    pub fn new(chain: Arc<EvmChain>) -> Self {
        EvmInspector { chain }
    }
}

#[async_trait]
impl Inspector for EvmInspector {
    async fn op_count(&self, _ctx: &ExecContext, mcm_address: &str) -> Result<u64, ChainError> {
        let output = self.chain.call(parse_address(mcm_address)?, encode_call(abi::GET_OP_COUNT, &[])).await?;
        let count = abi::decode_uint(&output)?;
        if count > U256::from(u64::MAX) {
            return Err(ChainError::Encoding(format!("op count {} does not fit in u64", count)));
        }
        Ok(count.as_u64())
    }

    async fn root(&self, _ctx: &ExecContext, mcm_address: &str) -> Result<(H256, u32), ChainError> {
        let output = self.chain.call(parse_address(mcm_address)?, encode_call(abi::GET_ROOT, &[])).await?;
        abi::decode_root(&output)
    }
}

/// Sends `setRoot` and `execute` to a ManyChainMultiSig.
#[derive(Debug)]
pub struct EvmExecutor {
    chain: Arc<EvmChain>,
    encoder: EvmEncoder,
}

impl EvmExecutor {
    pub fn new(chain: Arc<EvmChain>, encoder: EvmEncoder) -> Self {
        EvmExecutor { chain, encoder }
    }
}

#[async_trait]
impl Executor for EvmExecutor {
    async fn set_root(&self, _ctx: &ExecContext, request: SetRootRequest<'_>) -> Result<TransactionResult, ChainError> {
        let mcm = parse_address(&request.metadata.mcm_address)?;
        let proof = request.metadata_proof.iter().map(|node| bytes32(*node)).collect();
        let signatures = request
            .signatures
            .iter()
            .map(|sig| Token::Tuple(vec![Token::Uint(U256::from(sig.v)), bytes32(sig.r), bytes32(sig.s)]))
            .collect();
        let data = encode_call(
            abi::SET_ROOT,
            &[
                bytes32(request.root),
                Token::Uint(U256::from(request.valid_until)),
                self.encoder.metadata_token(request.metadata)?,
                Token::Array(proof),
                Token::Array(signatures),
            ],
        );
        self.chain.send(mcm, data, U256::zero()).await
    }

    async fn execute_operation(
        &self,
        _ctx: &ExecContext,
        request: ExecuteRequest<'_>,
    ) -> Result<TransactionResult, ChainError> {
        let mcm = parse_address(&request.metadata.mcm_address)?;
        let proof = request.proof.iter().map(|node| bytes32(*node)).collect();
        let op = self.encoder.operation_token(request.metadata, request.nonce, request.operation)?;
        let data = encode_call(abi::EXECUTE, &[op, Token::Array(proof)]);
        // The multisig pays any native value out of its own balance
        self.chain.send(mcm, data, U256::zero()).await
    }
}
