use crate::chain::aptos::AptosChain;
use crate::chain::evm::{EvmChain, DEFAULT_RECEIPT_POLL_INTERVAL};
use crate::chain::family::ChainFamily;
use crate::chain::solana::SolanaChain;
use crate::context::ExecContext;
use crate::error::{ChainError, EngineError};
use crate::proposal::{BatchOperation, ChainMetadata, ChainSelector, Operation, Signature, TimelockAction};
use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Family-specific transaction identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum RawTransaction {
    Evm { hash: H256 },
    Solana { signature: String },
    Aptos { hash: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub hash: String,
    pub chain_family: ChainFamily,
    pub raw_data: RawTransaction,
}

impl TransactionResult {
    pub fn evm(hash: H256) -> Self {
        TransactionResult {
            hash: format!("{:?}", hash),
            chain_family: ChainFamily::Evm,
            raw_data: RawTransaction::Evm { hash },
        }
    }

    pub fn solana(signature: impl Into<String>) -> Self {
        let signature = signature.into();
        TransactionResult {
            hash: signature.clone(),
            chain_family: ChainFamily::Solana,
            raw_data: RawTransaction::Solana { signature },
        }
    }

    pub fn aptos(hash: impl Into<String>) -> Self {
        let hash = hash.into();
        TransactionResult {
            hash: hash.clone(),
            chain_family: ChainFamily::Aptos,
            raw_data: RawTransaction::Aptos { hash },
        }
    }
}

/// Handle to one configured chain.
#[derive(Clone, Debug)]
pub enum BlockChain {
    Evm(Arc<EvmChain>),
    Solana(Arc<SolanaChain>),
    Aptos(Arc<AptosChain>),
}

impl BlockChain {
    pub fn selector(&self) -> ChainSelector {
        match self {
            BlockChain::Evm(chain) => chain.selector(),
            BlockChain::Solana(chain) => chain.selector(),
            BlockChain::Aptos(chain) => chain.selector(),
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            BlockChain::Evm(_) => ChainFamily::Evm,
            BlockChain::Solana(_) => ChainFamily::Solana,
            BlockChain::Aptos(_) => ChainFamily::Aptos,
        }
    }

    /// Blocks until the chain reports `result` final, or fails definitively.
    ///
    /// Solana confirms inside `send_and_confirm`, so there is nothing left to
    /// wait for here.
    pub async fn confirm(&self, ctx: &ExecContext, result: &TransactionResult) -> Result<(), EngineError> {
        self.confirm_with(ctx, result, DEFAULT_RECEIPT_POLL_INTERVAL).await
    }

    /// `confirm` with an explicit receipt poll interval (EVM only).
    pub async fn confirm_with(
        &self,
        ctx: &ExecContext,
        result: &TransactionResult,
        poll_interval: Duration,
    ) -> Result<(), EngineError> {
        let selector = self.selector();
        let confirm_err = |source: ChainError| EngineError::Confirm { selector, hash: result.hash.clone(), source };
        match (self, &result.raw_data) {
            (BlockChain::Evm(chain), RawTransaction::Evm { hash }) => chain.confirm(ctx, *hash, poll_interval).await,
            (BlockChain::Solana(_), RawTransaction::Solana { .. }) => Ok(()),
            (BlockChain::Aptos(chain), RawTransaction::Aptos { hash }) => {
                let hash = hash.clone();
                ctx.run(async { chain.client().wait_for_transaction(&hash).await.map_err(confirm_err) }).await
            }
            _ => Err(confirm_err(ChainError::Encoding(format!(
                "{} transaction handed to a {} chain",
                result.chain_family,
                self.family()
            )))),
        }
    }
}

/// Where the engine finds the chains a proposal touches.
pub trait Environment: Send + Sync {
    fn get_by_selector(&self, selector: ChainSelector) -> Result<BlockChain, EngineError>;
}

#[derive(Clone, Debug, Default)]
pub struct BlockChains {
    chains: BTreeMap<ChainSelector, BlockChain>,
}

impl BlockChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, chain: BlockChain) -> &mut Self {
        self.chains.insert(chain.selector(), chain);
        self
    }

    pub fn with(mut self, chain: BlockChain) -> Self {
        self.add(chain);
        self
    }

    pub fn selectors(&self) -> impl Iterator<Item = ChainSelector> + '_ {
        self.chains.keys().copied()
    }
}

impl FromIterator<BlockChain> for BlockChains {
    fn from_iter<I: IntoIterator<Item = BlockChain>>(iter: I) -> Self {
        let mut chains = BlockChains::new();
        for chain in iter {
            chains.add(chain);
        }
        chains
    }
}

impl Environment for BlockChains {
    fn get_by_selector(&self, selector: ChainSelector) -> Result<BlockChain, EngineError> {
        self.chains.get(&selector).cloned().ok_or(EngineError::BlockchainNotFound(selector))
    }
}

/// A payload signed by a chain's ed25519 deployer key before it is handed to
/// the wire client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload<T> {
    pub payload: T,
    pub signer: String,
    pub signature: String,
}

pub fn sign_payload<T: Serialize>(key: &SigningKey, payload: T) -> Result<SignedPayload<T>, ChainError> {
    let message = serde_json::to_vec(&payload).map_err(|e| ChainError::Encoding(e.to_string()))?;
    let signature = key.sign(&message);
    Ok(SignedPayload {
        payload,
        signer: hex::encode(key.verifying_key().as_bytes()),
        signature: hex::encode(signature.to_bytes()),
    })
}

impl<T: Serialize> SignedPayload<T> {
    pub fn verify(&self) -> Result<(), ChainError> {
        let invalid = |what: &str| ChainError::Encoding(format!("invalid payload {what}"));
        let signer: [u8; 32] = hex::decode(&self.signer)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| invalid("signer"))?;
        let signature: [u8; 64] = hex::decode(&self.signature)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| invalid("signature"))?;
        let key = VerifyingKey::from_bytes(&signer).map_err(|_| invalid("signer"))?;
        let message = serde_json::to_vec(&self.payload).map_err(|e| ChainError::Encoding(e.to_string()))?;
        key.verify(&message, &ed25519_dalek::Signature::from_bytes(&signature))
            .map_err(|_| invalid("signature"))
    }
}

// --- Capabilities built by the factory registry ---

/// Read-only view of a chain's MCMS contract.
#[async_trait]
pub trait Inspector: Send + Sync {
    async fn op_count(&self, ctx: &ExecContext, mcm_address: &str) -> Result<u64, ChainError>;

    /// Currently authorized root and its expiry.
    async fn root(&self, ctx: &ExecContext, mcm_address: &str) -> Result<(H256, u32), ChainError>;
}

pub struct ConvertRequest<'a> {
    pub metadata: &'a ChainMetadata,
    pub timelock_address: &'a str,
    pub batch: &'a BatchOperation,
    pub action: TimelockAction,
    pub delay: Duration,
    pub predecessor: H256,
    pub salt: H256,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConvertedBatch {
    pub operations: Vec<Operation>,
    pub operation_id: H256,
}

/// Turns one timelock batch into the MCMS operations that schedule, cancel or
/// bypass it.
#[async_trait]
pub trait TimelockConverter: Send + Sync {
    async fn convert_batch(&self, ctx: &ExecContext, request: ConvertRequest<'_>) -> Result<ConvertedBatch, ChainError>;

    fn hash_operation_batch(
        &self,
        timelock_address: &str,
        batch: &BatchOperation,
        predecessor: H256,
        salt: H256,
    ) -> Result<H256, ChainError>;
}

pub struct SetRootRequest<'a> {
    pub metadata: &'a ChainMetadata,
    pub metadata_proof: Vec<H256>,
    pub root: H256,
    pub valid_until: u32,
    pub signatures: &'a [Signature],
}

pub struct ExecuteRequest<'a> {
    pub metadata: &'a ChainMetadata,
    pub operation: &'a Operation,
    pub nonce: u64,
    pub proof: Vec<H256>,
    pub root: H256,
    pub valid_until: u32,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn set_root(&self, ctx: &ExecContext, request: SetRootRequest<'_>) -> Result<TransactionResult, ChainError>;

    async fn execute_operation(
        &self,
        ctx: &ExecContext,
        request: ExecuteRequest<'_>,
    ) -> Result<TransactionResult, ChainError>;
}

/// One scheduled batch as the timelock knows it.
pub struct TimelockCall<'a> {
    pub timelock_address: &'a str,
    pub batch: &'a BatchOperation,
    pub operation_id: H256,
    pub predecessor: H256,
    pub salt: H256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimelockExecuteOptions {
    pub call_proxy: Option<String>,
}

#[async_trait]
pub trait TimelockExecutor: Send + Sync {
    /// `Ok(false)` and `ChainError::NotReady` both mean "not yet".
    async fn is_ready(&self, ctx: &ExecContext, call: &TimelockCall<'_>) -> Result<bool, ChainError>;

    async fn execute(
        &self,
        ctx: &ExecContext,
        call: &TimelockCall<'_>,
        options: &TimelockExecuteOptions,
    ) -> Result<TransactionResult, ChainError>;
}
