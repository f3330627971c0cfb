use super::abi::{self, bytes32, calls_token, encode_call, parse_address};
use super::EvmChain;
use crate::chain::interface::{
    ConvertRequest, ConvertedBatch, TimelockCall, TimelockConverter, TimelockExecuteOptions, TimelockExecutor,
    TransactionResult,
};
use crate::context::ExecContext;
use crate::error::ChainError;
use crate::proposal::{BatchOperation, Operation, TimelockAction, Transaction};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{H256, U256};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const TIMELOCK_CONTRACT_TYPE: &str = "RBACTimelock";

/// Encodes timelock batches as RBACTimelock calls made by the MCMS.
#[derive(Clone, Copy, Debug, Default)]
pub struct EvmTimelockConverter;

#[async_trait]
impl TimelockConverter for EvmTimelockConverter {
    async fn convert_batch(
        &self,
        _ctx: &ExecContext,
        request: ConvertRequest<'_>,
    ) -> Result<ConvertedBatch, ChainError> {
        parse_address(request.timelock_address)?;
        let transactions = &request.batch.transactions;
        let operation_id = abi::hash_operation_batch(transactions, request.predecessor, request.salt)?;

        let data = match request.action {
            TimelockAction::Schedule => encode_call(
                abi::SCHEDULE_BATCH,
                &[
                    calls_token(transactions)?,
                    bytes32(request.predecessor),
                    bytes32(request.salt),
                    Token::Uint(U256::from(request.delay.as_secs())),
                ],
            ),
            TimelockAction::Cancel => encode_call(abi::CANCEL, &[bytes32(operation_id)]),
            TimelockAction::Bypass => encode_call(abi::BYPASSER_EXECUTE_BATCH, &[calls_token(transactions)?]),
        };

        let tags: BTreeSet<&String> =
            transactions.iter().flat_map(|tx| tx.operation_metadata.tags.iter()).collect();
        let transaction = Transaction::new(request.timelock_address, data, TIMELOCK_CONTRACT_TYPE)
            .with_tags(tags.into_iter().cloned())
            .with_additional_fields(json!({ "value": 0 }));

        Ok(ConvertedBatch {
            operations: vec![Operation { chain_selector: request.batch.chain_selector, transaction }],
            operation_id,
        })
    }

    fn hash_operation_batch(
        &self,
        _timelock_address: &str,
        batch: &BatchOperation,
        predecessor: H256,
        salt: H256,
    ) -> Result<H256, ChainError> {
        abi::hash_operation_batch(&batch.transactions, predecessor, salt)
    }
}

/// Checks readiness and runs `executeBatch`, through a CallProxy when given.
#[derive(Debug)]
pub struct EvmTimelockExecutor {
    chain: Arc<EvmChain>,
}

impl EvmTimelockExecutor {
    pub fn new(chain: Arc<EvmChain>) -> Self {
        EvmTimelockExecutor { chain }
    }
}

#[async_trait]
impl TimelockExecutor for EvmTimelockExecutor {
    async fn is_ready(&self, _ctx: &ExecContext, call: &TimelockCall<'_>) -> Result<bool, ChainError> {
        let timelock = parse_address(call.timelock_address)?;
        let output = self
            .chain
            .call(timelock, encode_call(abi::IS_OPERATION_READY, &[bytes32(call.operation_id)]))
            .await?;
        abi::decode_bool(&output)
    }

    async fn execute(
        &self,
        _ctx: &ExecContext,
        call: &TimelockCall<'_>,
        options: &TimelockExecuteOptions,
    ) -> Result<TransactionResult, ChainError> {
        let target = match &options.call_proxy {
            Some(proxy) => parse_address(proxy)?,
            None => parse_address(call.timelock_address)?,
        };
        let transactions = &call.batch.transactions;
        let data = encode_call(
            abi::EXECUTE_BATCH,
            &[calls_token(transactions)?, bytes32(call.predecessor), bytes32(call.salt)],
        );
        self.chain.send(target, data, abi::total_value(transactions)?).await
    }
}
