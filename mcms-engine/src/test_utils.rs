// mcms-engine/src/test_utils.rs
// Mock wire clients recording every call, plus proposal fixtures

use crate::chain::aptos::{AptosChain, AptosClient, EntryFunction};
use crate::chain::evm::abi::{self, bytes32};
use crate::chain::evm::{EvmChain, EvmClient};
use crate::chain::interface::{BlockChain, BlockChains, SignedPayload};
use crate::chain::solana::{SolanaChain, SolanaClient, SolanaInstruction};
use crate::datastore::{AddressRef, MemoryAddressStore, CALL_PROXY, RBAC_TIMELOCK};
use crate::engine::Engine;
use crate::error::ChainError;
use crate::proposal::{
    BatchOperation, ChainMetadata, ChainSelector, Operation, Proposal, TimelockAction, TimelockProposal, Transaction,
};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use ethers::abi::Token;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::{id, keccak256};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

// geth-testnet (chain id 1337) in the default directory
pub const TEST_SELECTOR: ChainSelector = ChainSelector(3379446385462418246);
pub const SOLANA_SELECTOR: ChainSelector = ChainSelector(16423721717087811551);
pub const APTOS_SELECTOR: ChainSelector = ChainSelector(743186221051783445);

pub const MCM_ADDRESS: &str = "0x0000000000000000000000000000000000001111";
pub const TIMELOCK_ADDRESS: &str = "0x0000000000000000000000000000000000002222";
pub const CALL_PROXY_ADDRESS: &str = "0x0000000000000000000000000000000000003333";
pub const TARGET_ADDRESS: &str = "0x0000000000000000000000000000000000004444";

pub const SOLANA_MCM: &str = "McmProgram1111111111111111111111111111111111.mcm";
pub const SOLANA_TIMELOCK: &str = "TimelockProgram11111111111111111111111111111.timelock";
pub const APTOS_MCMS: &str = "0xa11ce";

// Far enough in the future to sign against
pub const VALID_UNTIL: u32 = 4_000_000_000;

/// Deterministic secp256k1 key for tests.
pub fn test_wallet(seed: u8) -> LocalWallet {
    LocalWallet::from_bytes(&[seed; 32]).unwrap()
}

pub fn test_ed25519_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Name of the contract function `data` calls, or its hex selector when unknown.
pub fn method_name(data: &[u8]) -> String {
    const KNOWN: &[(&str, &str)] = &[
        (abi::SET_ROOT, "setRoot"),
        (abi::EXECUTE, "execute"),
        (abi::GET_OP_COUNT, "getOpCount"),
        (abi::GET_ROOT, "getRoot"),
        (abi::SCHEDULE_BATCH, "scheduleBatch"),
        (abi::CANCEL, "cancel"),
        (abi::BYPASSER_EXECUTE_BATCH, "bypasserExecuteBatch"),
        (abi::EXECUTE_BATCH, "executeBatch"),
        (abi::IS_OPERATION_READY, "isOperationReady"),
    ];
    if data.len() < 4 {
        return "0x".to_string();
    }
    KNOWN
        .iter()
        .find(|(signature, _)| id(signature)[..] == data[..4])
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("0x{}", hex::encode(&data[..4])))
}

// --- Mock EVM client ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Send { to: Address, method: String, hash: H256 },
    Call { to: Address, method: String },
    Receipt { hash: H256 },
}

/// How the mock answers `isOperationReady`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
    // Ready once this many checks have answered false
    ReadyAfter(u32),
    Fail(String),
}

#[derive(Debug)]
struct MockEvmState {
    calls: Vec<RecordedCall>,
    pending: Option<TypedTransaction>,
    nonce: u64,
    readiness: Readiness,
    readiness_checks: u32,
    op_count: u64,
    failing_method: Option<String>,
    revert_receipts: bool,
}

#[derive(Debug)]
pub struct MockEvmClient {
    state: Mutex<MockEvmState>,
}

impl Default for MockEvmClient {
    fn default() -> Self {
        MockEvmClient {
            state: Mutex::new(MockEvmState {
                calls: Vec::new(),
                pending: None,
                nonce: 0,
                readiness: Readiness::Ready,
                readiness_checks: 0,
                op_count: 0,
                failing_method: None,
                revert_receipts: false,
            }),
        }
    }
}

impl MockEvmClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_readiness(readiness: Readiness) -> Arc<Self> {
        let client = Self::default();
        client.state.lock().unwrap().readiness = readiness;
        Arc::new(client)
    }

    pub fn set_op_count(&self, count: u64) {
        self.state.lock().unwrap().op_count = count;
    }

    /// Makes every send of `method` fail.
    pub fn fail_method(&self, method: &str) {
        self.state.lock().unwrap().failing_method = Some(method.to_string());
    }

    pub fn revert_receipts(&self) {
        self.state.lock().unwrap().revert_receipts = true;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn readiness_checks(&self) -> u32 {
        self.state.lock().unwrap().readiness_checks
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Send { method, .. } => Some(method),
                _ => None,
            })
            .collect()
    }

    pub fn sent_to(&self) -> Vec<(Address, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Send { to, method, .. } => Some((to, method)),
                _ => None,
            })
            .collect()
    }

    /// Methods whose receipts were fetched, in the order they were confirmed.
    pub fn confirmed_methods(&self) -> Vec<String> {
        let calls = self.calls();
        let mut by_hash = HashMap::new();
        let mut confirmed = Vec::new();
        for call in calls {
            match call {
                RecordedCall::Send { method, hash, .. } => {
                    by_hash.insert(hash, method);
                }
                RecordedCall::Receipt { hash } => {
                    confirmed.push(by_hash.get(&hash).cloned().unwrap_or_else(|| format!("{:?}", hash)));
                }
                RecordedCall::Call { .. } => {}
            }
        }
        confirmed
    }

    /// Every recorded interaction as a method name, in order ("receipt" for receipts).
    pub fn timeline(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| match call {
                RecordedCall::Send { method, .. } | RecordedCall::Call { method, .. } => method,
                RecordedCall::Receipt { .. } => "receipt".to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl EvmClient for MockEvmClient {
    async fn fill_transaction(&self, tx: &mut TypedTransaction) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        tx.set_nonce(state.nonce);
        tx.set_gas(500_000u64);
        tx.set_gas_price(1_000_000_000u64);
        state.nonce += 1;
        state.pending = Some(tx.clone());
        Ok(())
    }

    async fn send_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        let mut state = self.state.lock().unwrap();
        let tx = state.pending.take().ok_or_else(|| ChainError::Rpc("send without fill".to_string()))?;
        let to = tx.to_addr().copied().unwrap_or_default();
        let method = tx.data().map(|data| method_name(data)).unwrap_or_default();
        if state.failing_method.as_deref() == Some(method.as_str()) {
            return Err(ChainError::TransactionFailed(format!("{} reverted", method)));
        }
        let hash = H256::from(keccak256(&raw));
        state.calls.push(RecordedCall::Send { to, method, hash });
        Ok(hash)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        let mut state = self.state.lock().unwrap();
        let to = tx.to_addr().copied().unwrap_or_default();
        let method = tx.data().map(|data| method_name(data)).unwrap_or_default();
        state.calls.push(RecordedCall::Call { to, method: method.clone() });
        let output = match method.as_str() {
            "isOperationReady" => {
                state.readiness_checks += 1;
                let ready = match &state.readiness {
                    Readiness::Ready => true,
                    Readiness::NotReady => false,
                    Readiness::ReadyAfter(n) => state.readiness_checks > *n,
                    Readiness::Fail(message) => return Err(ChainError::Rpc(message.clone())),
                };
                ethers::abi::encode(&[Token::Bool(ready)])
            }
            "getOpCount" => ethers::abi::encode(&[Token::Uint(U256::from(state.op_count))]),
            "getRoot" => ethers::abi::encode(&[bytes32(H256::zero()), Token::Uint(U256::zero())]),
            other => return Err(ChainError::Rpc(format!("unexpected call {}", other))),
        };
        Ok(output.into())
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall::Receipt { hash });
        let status = if state.revert_receipts { U64::zero() } else { U64::one() };
        Ok(Some(TransactionReceipt { transaction_hash: hash, status: Some(status), ..Default::default() }))
    }
}

pub fn evm_chain(selector: ChainSelector, client: Arc<MockEvmClient>) -> BlockChain {
    BlockChain::Evm(Arc::new(EvmChain::new(selector, 1337, client, test_wallet(99))))
}

// --- Mock Solana client ---

#[derive(Debug, Default)]
pub struct MockSolanaClient {
    sent: Mutex<Vec<SignedPayload<SolanaInstruction>>>,
    views: Mutex<Vec<String>>,
    not_ready: Mutex<bool>,
    op_count: Mutex<u64>,
}

impl MockSolanaClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_not_ready(&self) {
        *self.not_ready.lock().unwrap() = true;
    }

    pub fn set_op_count(&self, count: u64) {
        *self.op_count.lock().unwrap() = count;
    }

    pub fn sent(&self) -> Vec<SignedPayload<SolanaInstruction>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent().into_iter().map(|signed| signed.payload.method).collect()
    }

    pub fn views(&self) -> Vec<String> {
        self.views.lock().unwrap().clone()
    }
}

#[async_trait]
impl SolanaClient for MockSolanaClient {
    async fn send_and_confirm(&self, instruction: SignedPayload<SolanaInstruction>) -> Result<String, ChainError> {
        instruction.verify()?;
        let mut sent = self.sent.lock().unwrap();
        sent.push(instruction);
        Ok(format!("solsig{}", sent.len()))
    }

    async fn view(&self, _program_id: &str, method: &str, _args: Value) -> Result<Value, ChainError> {
        self.views.lock().unwrap().push(method.to_string());
        match method {
            "is_operation_ready" => Ok(Value::Bool(!*self.not_ready.lock().unwrap())),
            "get_op_count" => Ok(json!(*self.op_count.lock().unwrap())),
            "get_root" => Ok(json!({ "root": format!("{:?}", H256::zero()), "validUntil": 0 })),
            other => Err(ChainError::Rpc(format!("unexpected view {}", other))),
        }
    }
}

pub fn solana_chain(selector: ChainSelector, client: Arc<MockSolanaClient>) -> BlockChain {
    BlockChain::Solana(Arc::new(SolanaChain::new(selector, client, test_ed25519_key(7))))
}

// --- Mock Aptos client ---

#[derive(Debug, Default)]
pub struct MockAptosClient {
    submitted: Mutex<Vec<SignedPayload<EntryFunction>>>,
    waited: Mutex<Vec<String>>,
    views: Mutex<Vec<String>>,
    op_count: Mutex<u64>,
}

impl MockAptosClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_op_count(&self, count: u64) {
        *self.op_count.lock().unwrap() = count;
    }

    pub fn submitted(&self) -> Vec<SignedPayload<EntryFunction>> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_functions(&self) -> Vec<String> {
        self.submitted().into_iter().map(|signed| signed.payload.function).collect()
    }

    pub fn waited(&self) -> Vec<String> {
        self.waited.lock().unwrap().clone()
    }

    pub fn views(&self) -> Vec<String> {
        self.views.lock().unwrap().clone()
    }
}

#[async_trait]
impl AptosClient for MockAptosClient {
    async fn submit(&self, payload: SignedPayload<EntryFunction>) -> Result<String, ChainError> {
        payload.verify()?;
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(payload);
        Ok(format!("0x{:064x}", submitted.len()))
    }

    async fn wait_for_transaction(&self, hash: &str) -> Result<(), ChainError> {
        self.waited.lock().unwrap().push(hash.to_string());
        Ok(())
    }

    async fn view(&self, function: &EntryFunction) -> Result<Vec<Value>, ChainError> {
        self.views.lock().unwrap().push(function.function.clone());
        match function.function.as_str() {
            "timelock_is_operation_ready" => Ok(vec![json!(true)]),
            // u64 view results come back as strings
            "get_op_count" => Ok(vec![json!(self.op_count.lock().unwrap().to_string())]),
            "get_root" => Ok(vec![json!(format!("{:?}", H256::zero())), json!("0")]),
            other => Err(ChainError::Rpc(format!("unexpected view {}", other))),
        }
    }
}

pub fn aptos_chain(selector: ChainSelector, client: Arc<MockAptosClient>) -> BlockChain {
    BlockChain::Aptos(Arc::new(AptosChain::new(selector, client, test_ed25519_key(8))))
}

// --- Proposal fixtures ---

pub fn target_call(data: u8) -> Transaction {
    Transaction::new(TARGET_ADDRESS, vec![data], "Target").with_additional_fields(json!({ "value": 0 }))
}

/// Plain proposal with `ops` calls on one EVM chain.
pub fn mcms_proposal(selector: ChainSelector, ops: usize) -> Proposal {
    let mut metadata = BTreeMap::new();
    metadata.insert(selector, ChainMetadata::new(0, MCM_ADDRESS));
    let operations = (0..ops)
        .map(|i| Operation { chain_selector: selector, transaction: target_call(i as u8) })
        .collect();
    let mut proposal = Proposal::new("v1", VALID_UNTIL, metadata, operations);
    proposal.description = "test proposal".to_string();
    proposal
}

/// Timelock proposal with `batches` single-call batches on one EVM chain.
pub fn timelock_proposal(selector: ChainSelector, action: TimelockAction, batches: usize) -> TimelockProposal {
    let mut metadata = BTreeMap::new();
    metadata.insert(selector, ChainMetadata::new(0, MCM_ADDRESS));
    let mut timelocks = BTreeMap::new();
    timelocks.insert(selector, TIMELOCK_ADDRESS.to_string());
    let operations = (0..batches)
        .map(|i| BatchOperation { chain_selector: selector, transactions: vec![target_call(i as u8)] })
        .collect();
    let mut proposal = TimelockProposal::new("v1", VALID_UNTIL, action, metadata, timelocks, operations);
    proposal.description = "test timelock proposal".to_string();
    proposal
}

pub fn solana_timelock_proposal(action: TimelockAction) -> TimelockProposal {
    let mut metadata = BTreeMap::new();
    metadata.insert(SOLANA_SELECTOR, ChainMetadata::new(0, SOLANA_MCM));
    let mut timelocks = BTreeMap::new();
    timelocks.insert(SOLANA_SELECTOR, SOLANA_TIMELOCK.to_string());
    let batch = BatchOperation {
        chain_selector: SOLANA_SELECTOR,
        transactions: vec![Transaction::new("TargetProgram111", vec![1u8, 2, 3], "Target")
            .with_additional_fields(json!({ "accounts": ["Account111"] }))],
    };
    TimelockProposal::new("v1", VALID_UNTIL, action, metadata, timelocks, vec![batch])
}

pub fn aptos_call(data: u8) -> Transaction {
    Transaction::new("0xbeef", vec![data], "FeeQuoter")
        .with_additional_fields(json!({ "moduleName": "fee_quoter", "function": "apply_updates" }))
}

pub fn aptos_timelock_proposal(action: TimelockAction) -> TimelockProposal {
    let mut metadata = BTreeMap::new();
    metadata.insert(APTOS_SELECTOR, ChainMetadata::new(0, APTOS_MCMS));
    let mut timelocks = BTreeMap::new();
    timelocks.insert(APTOS_SELECTOR, APTOS_MCMS.to_string());
    let batch = BatchOperation { chain_selector: APTOS_SELECTOR, transactions: vec![aptos_call(1)] };
    TimelockProposal::new("v1", VALID_UNTIL, action, metadata, timelocks, vec![batch])
}

/// RBACTimelock + CallProxy refs for `TIMELOCK_ADDRESS` on `selector`, both unqualified.
pub fn call_proxy_store(selector: ChainSelector) -> MemoryAddressStore {
    MemoryAddressStore::from_refs([
        AddressRef::new(selector, RBAC_TIMELOCK, "1.0.0", "", TIMELOCK_ADDRESS),
        AddressRef::new(selector, CALL_PROXY, "1.0.0", "", CALL_PROXY_ADDRESS),
    ])
    .unwrap()
}

/// Engine over the given chains and address store, default registry and directory.
pub fn test_engine(chains: Vec<BlockChain>, store: MemoryAddressStore) -> Engine {
    Engine::new(Arc::new(chains.into_iter().collect::<BlockChains>()), Arc::new(store))
}
