// Aptos family: one MCMS Move package holding a multisig per role plus the timelock

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
use ethers::types::H256;
use ethers::utils::keccak256;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

pub const MCMS_MODULE: &str = "mcms";

const METADATA_DOMAIN_SEPARATOR: &[u8] = b"MANY_CHAIN_MULTI_SIG_DOMAIN_SEPARATOR_METADATA_APTOS";
const OP_DOMAIN_SEPARATOR: &[u8] = b"MANY_CHAIN_MULTI_SIG_DOMAIN_SEPARATOR_OP_APTOS";

/// MCMS role; each role is a separate multisig with its own root and op count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AptosRole {
    Bypasser = 0,
    Canceller = 1,
    Proposer = 2,
}

impl From<TimelockAction> for AptosRole {
    fn from(action: TimelockAction) -> Self {
        match action {
            TimelockAction::Schedule => AptosRole::Proposer,
            TimelockAction::Cancel => AptosRole::Canceller,
            TimelockAction::Bypass => AptosRole::Bypasser,
        }
    }
}

impl AptosRole {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// `<module_address>::<module_name>::<function>(args..)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFunction {
    pub module_address: String,
    pub module_name: String,
    pub function: String,
    pub args: Vec<Value>,
}

impl EntryFunction {
    pub fn mcms(package: &str, function: &str, args: Vec<Value>) -> Self {
        EntryFunction {
            module_address: package.to_string(),
            module_name: MCMS_MODULE.to_string(),
            function: function.to_string(),
            args,
        }
    }
}

#[async_trait]
pub trait AptosClient: Send + Sync {
    /// Submits a signed entry function call, returning the transaction hash.
    async fn submit(&self, payload: SignedPayload<EntryFunction>) -> Result<String, ChainError>;

    async fn wait_for_transaction(&self, hash: &str) -> Result<(), ChainError>;

    async fn view(&self, function: &EntryFunction) -> Result<Vec<Value>, ChainError>;
}

pub struct AptosChain {
    selector: ChainSelector,
    client: Arc<dyn AptosClient>,
    deployer: SigningKey,
}

impl fmt::Debug for AptosChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AptosChain")
            .field("selector", &self.selector)
            .field("deployer", &hex::encode(self.deployer.verifying_key().as_bytes()))
            .finish()
    }
}

impl AptosChain {
    pub fn new(selector: ChainSelector, client: Arc<dyn AptosClient>, deployer: SigningKey) -> Self {
        AptosChain { selector, client, deployer }
    }

    pub fn selector(&self) -> ChainSelector {
        self.selector
    }

    pub fn client(&self) -> &Arc<dyn AptosClient> {
        &self.client
    }

    pub async fn submit(&self, function: EntryFunction) -> Result<TransactionResult, ChainError> {
        let name = format!("{}::{}", function.module_name, function.function);
        let signed = sign_payload(&self.deployer, function)?;
        let hash = self.client.submit(signed).await?;
        debug!("[AptosChain {}] Submitted {} as {}", self.selector, name, hash);
        Ok(TransactionResult::aptos(hash))
    }
}

// BCS vectors: ULEB128 length prefix
fn put_uleb128(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_uleb128(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn hex_string(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Target module and function of a call, from `additionalFields`.
fn call_target(tx: &Transaction) -> Result<(&str, &str), ChainError> {
    let field = |name: &str| {
        tx.additional_fields
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ChainError::Encoding(format!("aptos call to {} is missing additionalFields.{}", tx.to, name))
            })
    };
    Ok((field("moduleName")?, field("function")?))
}

/// Parallel vectors the timelock entry functions take: targets, modules, functions, datas.
fn batch_vectors(transactions: &[Transaction]) -> Result<[Vec<Value>; 4], ChainError> {
    let mut vectors: [Vec<Value>; 4] = Default::default();
    for tx in transactions {
        let (module, function) = call_target(tx)?;
        vectors[0].push(json!(tx.to));
        vectors[1].push(json!(module));
        vectors[2].push(json!(function));
        vectors[3].push(json!(hex_string(&tx.data)));
    }
    Ok(vectors)
}

fn parse_u64(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// SHA-256 leaves that also commit to the multisig role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AptosEncoder {
    pub selector: ChainSelector,
    pub chain_id: u64,
    pub tx_count: u64,
    pub override_previous_root: bool,
    pub role: AptosRole,
}

impl AptosEncoder {
    pub fn new(
        selector: ChainSelector,
        chain_id: u64,
        tx_count: u64,
        override_previous_root: bool,
        role: AptosRole,
    ) -> Self {
        AptosEncoder { selector, chain_id, tx_count, override_previous_root, role }
    }

    pub fn with_role(mut self, role: AptosRole) -> Self {
        self.role = role;
        self
    }

    fn post_op_count(&self, metadata: &ChainMetadata) -> Result<u64, ChainError> {
        metadata
            .starting_op_count
            .checked_add(self.tx_count)
            .ok_or_else(|| ChainError::Encoding("post op count overflows".to_string()))
    }

    pub fn hash_metadata(&self, metadata: &ChainMetadata) -> Result<H256, ChainError> {
        let mut hasher = Sha256::new();
        hasher.update(keccak256(METADATA_DOMAIN_SEPARATOR));
        hasher.update([self.role.as_u8()]);
        hasher.update(self.chain_id.to_le_bytes());
        hasher.update(metadata.mcm_address.to_ascii_lowercase().as_bytes());
        hasher.update(metadata.starting_op_count.to_le_bytes());
        hasher.update(self.post_op_count(metadata)?.to_le_bytes());
        hasher.update([u8::from(self.override_previous_root)]);
        Ok(H256::from_slice(&hasher.finalize()))
    }

    pub fn hash_operation(&self, metadata: &ChainMetadata, nonce: u64, op: &Operation) -> Result<H256, ChainError> {
        let tx = &op.transaction;
        let (module, function) = call_target(tx)?;
        let mut body = Vec::new();
        put_bytes(&mut body, tx.to.to_ascii_lowercase().as_bytes());
        put_bytes(&mut body, module.as_bytes());
        put_bytes(&mut body, function.as_bytes());
        put_bytes(&mut body, &tx.data);

        let mut hasher = Sha256::new();
        hasher.update(keccak256(OP_DOMAIN_SEPARATOR));
        hasher.update([self.role.as_u8()]);
        hasher.update(self.chain_id.to_le_bytes());
        hasher.update(metadata.mcm_address.to_ascii_lowercase().as_bytes());
        hasher.update(nonce.to_le_bytes());
        hasher.update(&body);
        Ok(H256::from_slice(&hasher.finalize()))
    }
}

/// Encodes batches as calls into the MCMS package's own timelock entry points.
#[derive(Clone, Copy, Debug, Default)]
pub struct AptosTimelockConverter;

#[async_trait]
impl TimelockConverter for AptosTimelockConverter {
    async fn convert_batch(
        &self,
        _ctx: &ExecContext,
        request: ConvertRequest<'_>,
    ) -> Result<ConvertedBatch, ChainError> {
        let transactions = &request.batch.transactions;
        let operation_id =
            self.hash_operation_batch(request.timelock_address, request.batch, request.predecessor, request.salt)?;
        let [targets, modules, functions, datas] = batch_vectors(transactions)?;

        let (function, args) = match request.action {
            TimelockAction::Schedule => (
                "timelock_schedule_batch",
                vec![
                    json!(targets),
                    json!(modules),
                    json!(functions),
                    json!(datas),
                    json!(format!("{:?}", request.predecessor)),
                    json!(format!("{:?}", request.salt)),
                    json!(request.delay.as_secs().to_string()),
                ],
            ),
            TimelockAction::Cancel => ("timelock_cancel", vec![json!(format!("{:?}", operation_id))]),
            TimelockAction::Bypass => (
                "timelock_bypasser_execute_batch",
                vec![json!(targets), json!(modules), json!(functions), json!(datas)],
            ),
        };

        let data = serde_json::to_vec(&args).map_err(|e| ChainError::Encoding(e.to_string()))?;
        let transaction = Transaction::new(request.timelock_address, data, "RBACTimelock")
            .with_additional_fields(json!({ "moduleName": MCMS_MODULE, "function": function }));
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
        let mut buf = Vec::new();
        put_uleb128(&mut buf, batch.transactions.len() as u64);
        for tx in &batch.transactions {
            let (module, function) = call_target(tx)?;
            put_bytes(&mut buf, tx.to.to_ascii_lowercase().as_bytes());
            put_bytes(&mut buf, module.as_bytes());
            put_bytes(&mut buf, function.as_bytes());
            put_bytes(&mut buf, &tx.data);
        }
        buf.extend_from_slice(predecessor.as_bytes());
        buf.extend_from_slice(salt.as_bytes());
        Ok(H256::from(keccak256(buf)))
    }
}

#[derive(Debug)]
pub struct AptosInspector {
    chain: Arc<AptosChain>,
    role: AptosRole,
}

#[async_trait]
impl Inspector for AptosInspector {
    async fn op_count(&self, _ctx: &ExecContext, mcm_address: &str) -> Result<u64, ChainError> {
        let function = EntryFunction::mcms(mcm_address, "get_op_count", vec![json!(self.role.as_u8())]);
        let answer = self.chain.client.view(&function).await?;
        answer
            .first()
            .and_then(parse_u64)
            .ok_or_else(|| ChainError::Encoding(format!("unexpected get_op_count answer {:?}", answer)))
    }

    async fn root(&self, _ctx: &ExecContext, mcm_address: &str) -> Result<(H256, u32), ChainError> {
        let function = EntryFunction::mcms(mcm_address, "get_root", vec![json!(self.role.as_u8())]);
        let answer = self.chain.client.view(&function).await?;
        let root = answer.first().and_then(Value::as_str).and_then(|s| s.parse::<H256>().ok());
        let valid_until = answer.get(1).and_then(parse_u64).and_then(|v| u32::try_from(v).ok());
        root.zip(valid_until)
            .ok_or_else(|| ChainError::Encoding(format!("unexpected get_root answer {:?}", answer)))
    }
}

#[derive(Debug)]
pub struct AptosExecutor {
    chain: Arc<AptosChain>,
    encoder: AptosEncoder,
}

#[async_trait]
impl Executor for AptosExecutor {
    async fn set_root(&self, _ctx: &ExecContext, request: SetRootRequest<'_>) -> Result<TransactionResult, ChainError> {
        let metadata = request.metadata;
        let proof: Vec<String> = request.metadata_proof.iter().map(|node| format!("{:?}", node)).collect();
        let signatures: Vec<String> = request
            .signatures
            .iter()
            .map(|sig| {
                let mut bytes = sig.r.as_bytes().to_vec();
                bytes.extend_from_slice(sig.s.as_bytes());
                bytes.push(sig.v);
                hex_string(&bytes)
            })
            .collect();
        let args = vec![
            json!(self.encoder.role.as_u8()),
            json!(format!("{:?}", request.root)),
            json!(request.valid_until),
            json!(self.encoder.chain_id.to_string()),
            json!(metadata.mcm_address),
            json!(metadata.starting_op_count.to_string()),
            json!(self.encoder.post_op_count(metadata)?.to_string()),
            json!(self.encoder.override_previous_root),
            json!(proof),
            json!(signatures),
        ];
        self.chain.submit(EntryFunction::mcms(&metadata.mcm_address, "set_root", args)).await
    }

    async fn execute_operation(
        &self,
        _ctx: &ExecContext,
        request: ExecuteRequest<'_>,
    ) -> Result<TransactionResult, ChainError> {
        let tx = &request.operation.transaction;
        let (module, function) = call_target(tx)?;
        let proof: Vec<String> = request.proof.iter().map(|node| format!("{:?}", node)).collect();
        let args = vec![
            json!(self.encoder.role.as_u8()),
            json!(self.encoder.chain_id.to_string()),
            json!(request.metadata.mcm_address),
            json!(request.nonce.to_string()),
            json!(tx.to),
            json!(module),
            json!(function),
            json!(hex_string(&tx.data)),
            json!(proof),
        ];
        self.chain.submit(EntryFunction::mcms(&request.metadata.mcm_address, "execute", args)).await
    }
}

#[derive(Debug)]
pub struct AptosTimelockExecutor {
    chain: Arc<AptosChain>,
}

#[async_trait]
impl TimelockExecutor for AptosTimelockExecutor {
    async fn is_ready(&self, _ctx: &ExecContext, call: &TimelockCall<'_>) -> Result<bool, ChainError> {
        let function = EntryFunction::mcms(
            call.timelock_address,
            "timelock_is_operation_ready",
            vec![json!(format!("{:?}", call.operation_id))],
        );
        let answer = self.chain.client.view(&function).await?;
        answer
            .first()
            .and_then(Value::as_bool)
            .ok_or_else(|| ChainError::Encoding(format!("unexpected readiness answer {:?}", answer)))
    }

    async fn execute(
        &self,
        _ctx: &ExecContext,
        call: &TimelockCall<'_>,
        _options: &TimelockExecuteOptions,
    ) -> Result<TransactionResult, ChainError> {
        let [targets, modules, functions, datas] = batch_vectors(&call.batch.transactions)?;
        let args = vec![
            json!(targets),
            json!(modules),
            json!(functions),
            json!(datas),
            json!(format!("{:?}", call.predecessor)),
            json!(format!("{:?}", call.salt)),
        ];
        self.chain
            .submit(EntryFunction::mcms(call.timelock_address, "timelock_execute_batch", args))
            .await
    }
}

fn aptos_chain(chain: &BlockChain) -> Result<Arc<AptosChain>, EngineError> {
    match chain {
        BlockChain::Aptos(aptos) => Ok(aptos.clone()),
        other => Err(EngineError::ClientMismatch { selector: other.selector(), expected: ChainFamily::Aptos }),
    }
}

// Inspection and execution need a role, and the role only exists for timelock proposals
fn role_for(action: Option<TimelockAction>, role: &'static str) -> Result<AptosRole, EngineError> {
    action
        .map(AptosRole::from)
        .ok_or(EngineError::UnsupportedRole { family: ChainFamily::Aptos, role })
}

pub struct AptosInspectorFactory;

impl InspectorFactory for AptosInspectorFactory {
    fn make(&self, chain: &BlockChain, action: Option<TimelockAction>) -> Result<Arc<dyn Inspector>, EngineError> {
        let role = role_for(action, "inspection")?;
        Ok(Arc::new(AptosInspector { chain: aptos_chain(chain)?, role }))
    }
}

pub struct AptosTimelockConverterFactory;

impl TimelockConverterFactory for AptosTimelockConverterFactory {
    fn make(&self) -> Result<Arc<dyn TimelockConverter>, EngineError> {
        Ok(Arc::new(AptosTimelockConverter))
    }
}

pub struct AptosExecutorFactory;

impl ExecutorFactory for AptosExecutorFactory {
    fn make(
        &self,
        chain: &BlockChain,
        encoder: &Encoder,
        action: Option<TimelockAction>,
    ) -> Result<Arc<dyn Executor>, EngineError> {
        let role = role_for(action, "execution")?;
        let encoder = match encoder {
            Encoder::Aptos(encoder) => encoder.clone().with_role(role),
            other => return Err(EngineError::EncoderNotFound(other.selector())),
        };
        Ok(Arc::new(AptosExecutor { chain: aptos_chain(chain)?, encoder }))
    }
}

pub struct AptosTimelockExecutorFactory;

impl TimelockExecutorFactory for AptosTimelockExecutorFactory {
    fn make(&self, chain: &BlockChain) -> Result<Arc<dyn TimelockExecutor>, EngineError> {
        Ok(Arc::new(AptosTimelockExecutor { chain: aptos_chain(chain)? }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(data: u8) -> Transaction {
        Transaction::new("0xabc", vec![data], "Fees")
            .with_additional_fields(json!({ "moduleName": "fee_quoter", "function": "set_fee" }))
    }

    #[test]
    fn roles_follow_the_action() {
        assert_eq!(AptosRole::from(TimelockAction::Schedule).as_u8(), 2);
        assert_eq!(AptosRole::from(TimelockAction::Cancel).as_u8(), 1);
        assert_eq!(AptosRole::from(TimelockAction::Bypass).as_u8(), 0);
    }

    #[test]
    fn uleb128_matches_bcs() {
        let mut buf = Vec::new();
        put_uleb128(&mut buf, 300);
        assert_eq!(buf, vec![0xac, 0x02]);
    }

    #[test]
    fn leaves_commit_to_role() {
        let metadata = ChainMetadata::new(0, "0xmcms");
        let proposer = AptosEncoder::new(ChainSelector(1), 2, 1, false, AptosRole::Proposer);
        let bypasser = proposer.clone().with_role(AptosRole::Bypasser);
        assert_ne!(proposer.hash_metadata(&metadata).unwrap(), bypasser.hash_metadata(&metadata).unwrap());
        let op = Operation { chain_selector: ChainSelector(1), transaction: call(1) };
        assert_ne!(
            proposer.hash_operation(&metadata, 0, &op).unwrap(),
            bypasser.hash_operation(&metadata, 0, &op).unwrap()
        );
    }

    #[test]
    fn calls_need_module_and_function() {
        let op = Operation { chain_selector: ChainSelector(1), transaction: Transaction::new("0xabc", vec![1u8], "T") };
        let encoder = AptosEncoder::new(ChainSelector(1), 2, 1, false, AptosRole::Proposer);
        let err = encoder.hash_operation(&ChainMetadata::new(0, "0xmcms"), 0, &op).unwrap_err();
        assert!(err.to_string().contains("moduleName"));
    }

    #[test]
    fn role_is_required_outside_timelock_proposals() {
        let err = role_for(None, "execution").unwrap_err();
        assert_eq!(err.to_string(), "aptos does not support execution on non-timelock proposals");
        assert_eq!(role_for(Some(TimelockAction::Cancel), "execution").unwrap(), AptosRole::Canceller);
    }

    #[tokio::test]
    async fn cancel_targets_the_operation_id() {
        let batch = BatchOperation { chain_selector: ChainSelector(1), transactions: vec![call(1), call(2)] };
        let metadata = ChainMetadata::new(0, "0xmcms");
        let converted = AptosTimelockConverter
            .convert_batch(
                &ExecContext::new(),
                ConvertRequest {
                    metadata: &metadata,
                    timelock_address: "0xmcms",
                    batch: &batch,
                    action: TimelockAction::Cancel,
                    delay: std::time::Duration::ZERO,
                    predecessor: H256::zero(),
                    salt: H256::zero(),
                },
            )
            .await
            .unwrap();
        let tx = &converted.operations[0].transaction;
        assert_eq!(tx.additional_fields["function"], "timelock_cancel");
        let args: Vec<String> = serde_json::from_slice(&tx.data).unwrap();
        assert_eq!(args, vec![format!("{:?}", converted.operation_id)]);
    }
}
