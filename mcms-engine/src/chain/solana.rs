// Solana family: MCM and timelock programs addressed as "<programId>.<seed>"

use crate::chain::encoder::Encoder;
use crate::chain::family::ChainFamily;
use crate::chain::interface::{
    sign_payload, BlockChain, ConvertRequest, ConvertedBatch, ExecuteRequest, Executor, Inspector, SetRootRequest,
    SignedPayload, TimelockCall, TimelockConverter, TimelockExecuteOptions, TimelockExecutor, TransactionResult,
};
use crate::context::ExecContext;
use crate::error::{ChainError, EngineError};
use crate::proposal::{BatchOperation, ChainMetadata, ChainSelector, Operation, TimelockAction, Transaction};
use crate::registry::{ExecutorFactory, InspectorFactory, TimelockConverterFactory, TimelockExecutorFactory};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use ethers::types::{Bytes, H256};
use ethers::utils::keccak256;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

const METADATA_DOMAIN_SEPARATOR: &[u8] = b"MANY_CHAIN_MULTI_SIG_DOMAIN_SEPARATOR_METADATA_SOLANA";
const OP_DOMAIN_SEPARATOR: &[u8] = b"MANY_CHAIN_MULTI_SIG_DOMAIN_SEPARATOR_OP_SOLANA";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaInstruction {
    pub program_id: String,
    pub seed: String,
    pub method: String,
    pub accounts: Vec<String>,
    pub data: Bytes,
}

#[async_trait]
pub trait SolanaClient: Send + Sync {
    /// Submits the instruction and returns its signature once confirmed.
    async fn send_and_confirm(&self, instruction: SignedPayload<SolanaInstruction>) -> Result<String, ChainError>;

    async fn view(&self, program_id: &str, method: &str, args: Value) -> Result<Value, ChainError>;
}

pub struct SolanaChain {
    selector: ChainSelector,
    client: Arc<dyn SolanaClient>,
    deployer: SigningKey,
}

impl fmt::Debug for SolanaChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaChain")
            .field("selector", &self.selector)
            .field("deployer", &hex::encode(self.deployer.verifying_key().as_bytes()))
            .finish()
    }
}

impl SolanaChain {
    pub fn new(selector: ChainSelector, client: Arc<dyn SolanaClient>, deployer: SigningKey) -> Self {
        SolanaChain { selector, client, deployer }
    }

    pub fn selector(&self) -> ChainSelector {
        self.selector
    }

    pub fn client(&self) -> &Arc<dyn SolanaClient> {
        &self.client
    }

    pub async fn send(&self, instruction: SolanaInstruction) -> Result<TransactionResult, ChainError> {
        let method = instruction.method.clone();
        let signed = sign_payload(&self.deployer, instruction)?;
        let signature = self.client.send_and_confirm(signed).await?;
        debug!("[SolanaChain {}] {} confirmed as {}", self.selector, method, signature);
        Ok(TransactionResult::solana(signature))
    }
}

/// Splits `"<programId>.<seed>"`.
pub fn parse_contract_address(address: &str) -> Result<(&str, &str), ChainError> {
    match address.trim().split_once('.') {
        Some((program, seed)) if !program.is_empty() && !seed.is_empty() => Ok((program, seed)),
        _ => Err(ChainError::Encoding(format!("expected <programId>.<seed>, got '{}'", address))),
    }
}

/// Anchor instruction discriminator: first 8 bytes of sha256("global:<method>").
pub fn discriminator(method: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", method).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Accounts listed in `additionalFields.accounts`, as strings or `{ "pubkey": .. }` objects.
pub fn accounts(fields: &Value) -> Result<Vec<String>, ChainError> {
    let Some(list) = fields.get("accounts") else {
        return Ok(Vec::new());
    };
    let list = list
        .as_array()
        .ok_or_else(|| ChainError::Encoding("additionalFields.accounts must be an array".to_string()))?;
    list.iter()
        .map(|entry| {
            entry
                .as_str()
                .or_else(|| entry.get("pubkey").and_then(Value::as_str))
                .map(str::to_string)
                .ok_or_else(|| ChainError::Encoding(format!("invalid account entry {}", entry)))
        })
        .collect()
}

// Length-prefixed (u32 little endian) byte string
fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn encode_calls(buf: &mut Vec<u8>, transactions: &[Transaction]) {
    buf.extend_from_slice(&(transactions.len() as u32).to_le_bytes());
    for tx in transactions {
        put_bytes(buf, tx.to.as_bytes());
        put_bytes(buf, &tx.data);
    }
}

fn instruction_data(method: &str, body: impl FnOnce(&mut Vec<u8>)) -> Bytes {
    let mut data = discriminator(method).to_vec();
    body(&mut data);
    data.into()
}

fn batch_accounts(timelock: &str, transactions: &[Transaction]) -> Result<Vec<String>, ChainError> {
    let mut seen = BTreeSet::new();
    let mut out = vec![timelock.to_string()];
    seen.insert(timelock.to_string());
    for tx in transactions {
        for account in std::iter::once(tx.to.clone()).chain(accounts(&tx.additional_fields)?) {
            if seen.insert(account.clone()) {
                out.push(account);
            }
        }
    }
    Ok(out)
}

/// Little-endian keccak leaves, bound to the chain selector and the MCM program instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolanaEncoder {
    pub selector: ChainSelector,
    pub chain_id: u64,
    pub tx_count: u64,
    pub override_previous_root: bool,
}

impl SolanaEncoder {
    pub fn new(selector: ChainSelector, chain_id: u64, tx_count: u64, override_previous_root: bool) -> Self {
        SolanaEncoder { selector, chain_id, tx_count, override_previous_root }
    }

    pub fn hash_metadata(&self, metadata: &ChainMetadata) -> Result<H256, ChainError> {
        let (program, seed) = parse_contract_address(&metadata.mcm_address)?;
        let pre = metadata.starting_op_count;
        let post = pre
            .checked_add(self.tx_count)
            .ok_or_else(|| ChainError::Encoding("post op count overflows".to_string()))?;
        let mut buf = keccak256(METADATA_DOMAIN_SEPARATOR).to_vec();
        buf.extend_from_slice(&self.selector.0.to_le_bytes());
        put_bytes(&mut buf, program.as_bytes());
        put_bytes(&mut buf, seed.as_bytes());
        buf.extend_from_slice(&pre.to_le_bytes());
        buf.extend_from_slice(&post.to_le_bytes());
        buf.push(u8::from(self.override_previous_root));
        Ok(H256::from(keccak256(buf)))
    }

    pub fn hash_operation(&self, metadata: &ChainMetadata, nonce: u64, op: &Operation) -> Result<H256, ChainError> {
        let (program, seed) = parse_contract_address(&metadata.mcm_address)?;
        let tx = &op.transaction;
        let mut buf = keccak256(OP_DOMAIN_SEPARATOR).to_vec();
        buf.extend_from_slice(&self.selector.0.to_le_bytes());
        put_bytes(&mut buf, program.as_bytes());
        put_bytes(&mut buf, seed.as_bytes());
        buf.extend_from_slice(&nonce.to_le_bytes());
        put_bytes(&mut buf, tx.to.as_bytes());
        put_bytes(&mut buf, &tx.data);
        let accounts = accounts(&tx.additional_fields)?;
        buf.extend_from_slice(&(accounts.len() as u32).to_le_bytes());
        for account in &accounts {
            put_bytes(&mut buf, account.as_bytes());
        }
        Ok(H256::from(keccak256(buf)))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SolanaTimelockConverter;

#[async_trait]
impl TimelockConverter for SolanaTimelockConverter {
    async fn convert_batch(
        &self,
        _ctx: &ExecContext,
        request: ConvertRequest<'_>,
    ) -> Result<ConvertedBatch, ChainError> {
        parse_contract_address(request.timelock_address)?;
        let transactions = &request.batch.transactions;
        let operation_id =
            self.hash_operation_batch(request.timelock_address, request.batch, request.predecessor, request.salt)?;

        let data = match request.action {
            TimelockAction::Schedule => instruction_data("schedule_batch", |buf| {
                buf.extend_from_slice(operation_id.as_bytes());
                buf.extend_from_slice(request.predecessor.as_bytes());
                buf.extend_from_slice(request.salt.as_bytes());
                buf.extend_from_slice(&request.delay.as_secs().to_le_bytes());
                encode_calls(buf, transactions);
            }),
            TimelockAction::Cancel => instruction_data("cancel", |buf| buf.extend_from_slice(operation_id.as_bytes())),
            TimelockAction::Bypass => instruction_data("bypasser_execute_batch", |buf| encode_calls(buf, transactions)),
        };

        let accounts = batch_accounts(request.timelock_address, transactions)?;
        let transaction = Transaction::new(request.timelock_address, data, "RBACTimelock")
            .with_additional_fields(json!({ "accounts": accounts }));
        Ok(ConvertedBatch {
            operations: vec![Operation { chain_selector: request.batch.chain_selector, transaction }],
            operation_id,
        })
    }

    fn hash_operation_batch(
        &self,
        timelock_address: &str,
        batch: &BatchOperation,
        predecessor: H256,
        salt: H256,
    ) -> Result<H256, ChainError> {
        let (program, seed) = parse_contract_address(timelock_address)?;
        let mut buf = Vec::new();
        put_bytes(&mut buf, program.as_bytes());
        put_bytes(&mut buf, seed.as_bytes());
        encode_calls(&mut buf, &batch.transactions);
        buf.extend_from_slice(predecessor.as_bytes());
        buf.extend_from_slice(salt.as_bytes());
        Ok(H256::from(keccak256(buf)))
    }
}

#[derive(Debug)]
pub struct SolanaInspector {
    chain: Arc<SolanaChain>,
}

#[async_trait]
impl Inspector for SolanaInspector {
    async fn op_count(&self, _ctx: &ExecContext, mcm_address: &str) -> Result<u64, ChainError> {
        let (program, seed) = parse_contract_address(mcm_address)?;
        let value = self.chain.client.view(program, "get_op_count", json!({ "seed": seed })).await?;
        value.as_u64().ok_or_else(|| ChainError::Encoding(format!("unexpected op count {}", value)))
    }

    async fn root(&self, _ctx: &ExecContext, mcm_address: &str) -> Result<(H256, u32), ChainError> {
        let (program, seed) = parse_contract_address(mcm_address)?;
        let value = self.chain.client.view(program, "get_root", json!({ "seed": seed })).await?;
        let root = value
            .get("root")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<H256>().ok());
        let valid_until = value.get("validUntil").and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok());
        root.zip(valid_until)
            .ok_or_else(|| ChainError::Encoding(format!("unexpected get_root answer {}", value)))
    }
}

#[derive(Debug)]
pub struct SolanaExecutor {
    chain: Arc<SolanaChain>,
    encoder: SolanaEncoder,
}

#[async_trait]
impl Executor for SolanaExecutor {
    async fn set_root(&self, _ctx: &ExecContext, request: SetRootRequest<'_>) -> Result<TransactionResult, ChainError> {
        let (program, seed) = parse_contract_address(&request.metadata.mcm_address)?;
        let pre = request.metadata.starting_op_count;
        let data = instruction_data("set_root", |buf| {
            buf.extend_from_slice(request.root.as_bytes());
            buf.extend_from_slice(&request.valid_until.to_le_bytes());
            buf.extend_from_slice(&pre.to_le_bytes());
            buf.extend_from_slice(&pre.saturating_add(self.encoder.tx_count).to_le_bytes());
            buf.push(u8::from(self.encoder.override_previous_root));
            buf.extend_from_slice(&(request.metadata_proof.len() as u32).to_le_bytes());
            for node in &request.metadata_proof {
                buf.extend_from_slice(node.as_bytes());
            }
            buf.extend_from_slice(&(request.signatures.len() as u32).to_le_bytes());
            for sig in request.signatures {
                buf.extend_from_slice(sig.r.as_bytes());
                buf.extend_from_slice(sig.s.as_bytes());
                buf.push(sig.v);
            }
        });
        self.chain
            .send(SolanaInstruction {
                program_id: program.to_string(),
                seed: seed.to_string(),
                method: "set_root".to_string(),
                accounts: Vec::new(),
                data,
            })
            .await
    }

    async fn execute_operation(
        &self,
        _ctx: &ExecContext,
        request: ExecuteRequest<'_>,
    ) -> Result<TransactionResult, ChainError> {
        let (program, seed) = parse_contract_address(&request.metadata.mcm_address)?;
        let tx = &request.operation.transaction;
        let data = instruction_data("execute", |buf| {
            buf.extend_from_slice(&request.nonce.to_le_bytes());
            put_bytes(buf, tx.to.as_bytes());
            put_bytes(buf, &tx.data);
            buf.extend_from_slice(&(request.proof.len() as u32).to_le_bytes());
            for node in &request.proof {
                buf.extend_from_slice(node.as_bytes());
            }
        });
        self.chain
            .send(SolanaInstruction {
                program_id: program.to_string(),
                seed: seed.to_string(),
                method: "execute".to_string(),
                accounts: accounts(&tx.additional_fields)?,
                data,
            })
            .await
    }
}

#[derive(Debug)]
pub struct SolanaTimelockExecutor {
    chain: Arc<SolanaChain>,
}

#[async_trait]
impl TimelockExecutor for SolanaTimelockExecutor {
    async fn is_ready(&self, _ctx: &ExecContext, call: &TimelockCall<'_>) -> Result<bool, ChainError> {
        let (program, seed) = parse_contract_address(call.timelock_address)?;
        let args = json!({ "seed": seed, "id": format!("{:?}", call.operation_id) });
        let value = self.chain.client.view(program, "is_operation_ready", args).await?;
        value.as_bool().ok_or_else(|| ChainError::Encoding(format!("unexpected readiness answer {}", value)))
    }

    // No CallProxy on Solana; the option is ignored
    async fn execute(
        &self,
        _ctx: &ExecContext,
        call: &TimelockCall<'_>,
        _options: &TimelockExecuteOptions,
    ) -> Result<TransactionResult, ChainError> {
        let (program, seed) = parse_contract_address(call.timelock_address)?;
        let transactions = &call.batch.transactions;
        let data = instruction_data("execute_batch", |buf| {
            buf.extend_from_slice(call.operation_id.as_bytes());
            encode_calls(buf, transactions);
        });
        self.chain
            .send(SolanaInstruction {
                program_id: program.to_string(),
                seed: seed.to_string(),
                method: "execute_batch".to_string(),
                accounts: batch_accounts(call.timelock_address, transactions)?,
                data,
            })
            .await
    }
}

fn solana_chain(chain: &BlockChain) -> Result<Arc<SolanaChain>, EngineError> {
    match chain {
        BlockChain::Solana(solana) => Ok(solana.clone()),
        other => Err(EngineError::ClientMismatch { selector: other.selector(), expected: ChainFamily::Solana }),
    }
}

pub struct SolanaInspectorFactory;

impl InspectorFactory for SolanaInspectorFactory {
    fn make(&self, chain: &BlockChain, _action: Option<TimelockAction>) -> Result<Arc<dyn Inspector>, EngineError> {
        Ok(Arc::new(SolanaInspector { chain: solana_chain(chain)? }))
    }
}

pub struct SolanaTimelockConverterFactory;

impl TimelockConverterFactory for SolanaTimelockConverterFactory {
    fn make(&self) -> Result<Arc<dyn TimelockConverter>, EngineError> {
        Ok(Arc::new(SolanaTimelockConverter))
    }
}

pub struct SolanaExecutorFactory;

impl ExecutorFactory for SolanaExecutorFactory {
    fn make(
        &self,
        chain: &BlockChain,
        encoder: &Encoder,
        _action: Option<TimelockAction>,
    ) -> Result<Arc<dyn Executor>, EngineError> {
        let encoder = match encoder {
            Encoder::Solana(encoder) => encoder.clone(),
            other => return Err(EngineError::EncoderNotFound(other.selector())),
        };
        Ok(Arc::new(SolanaExecutor { chain: solana_chain(chain)?, encoder }))
    }
}

pub struct SolanaTimelockExecutorFactory;

impl TimelockExecutorFactory for SolanaTimelockExecutorFactory {
    fn make(&self, chain: &BlockChain) -> Result<Arc<dyn TimelockExecutor>, EngineError> {
        Ok(Arc::new(SolanaTimelockExecutor { chain: solana_chain(chain)? }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_address_needs_program_and_seed() {
        assert_eq!(parse_contract_address("Prog111.mcm-seed").unwrap(), ("Prog111", "mcm-seed"));
        assert!(parse_contract_address("Prog111").is_err());
        assert!(parse_contract_address(".seed").is_err());
    }

    #[test]
    fn discriminators_differ_per_method() {
        assert_ne!(discriminator("set_root"), discriminator("execute"));
        assert_eq!(discriminator("set_root").len(), 8);
    }

    #[test]
    fn accounts_accept_strings_and_objects() {
        let fields = json!({ "accounts": ["A", { "pubkey": "B", "isWritable": true }] });
        assert_eq!(accounts(&fields).unwrap(), vec!["A".to_string(), "B".to_string()]);
        assert!(accounts(&json!({ "accounts": "A" })).is_err());
        assert!(accounts(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn leaves_are_bound_to_the_selector() {
        let metadata = ChainMetadata::new(0, "Mcm111.seed");
        let devnet = SolanaEncoder::new(ChainSelector(1), 0, 1, false);
        let mainnet = SolanaEncoder::new(ChainSelector(2), 0, 1, false);
        assert_ne!(devnet.hash_metadata(&metadata).unwrap(), mainnet.hash_metadata(&metadata).unwrap());
    }

    #[tokio::test]
    async fn converted_batch_carries_timelock_and_call_accounts() {
        let metadata = ChainMetadata::new(0, "Mcm111.seed");
        let batch = BatchOperation {
            chain_selector: ChainSelector(1),
            transactions: vec![Transaction::new("Target111", vec![9u8], "Token")
                .with_additional_fields(json!({ "accounts": ["Acct1"] }))],
        };
        let converted = SolanaTimelockConverter
            .convert_batch(
                &ExecContext::new(),
                ConvertRequest {
                    metadata: &metadata,
                    timelock_address: "Time111.seed",
                    batch: &batch,
                    action: TimelockAction::Schedule,
                    delay: std::time::Duration::from_secs(60),
                    predecessor: H256::zero(),
                    salt: H256::repeat_byte(1),
                },
            )
            .await
            .unwrap();
        let tx = &converted.operations[0].transaction;
        assert_eq!(&tx.data[..8], &discriminator("schedule_batch")[..]);
        assert_eq!(accounts(&tx.additional_fields).unwrap(), vec!["Time111.seed", "Target111", "Acct1"]);
    }
}
