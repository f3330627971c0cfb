// EVM family: chain handle, wire client seam and the four capability factories

pub mod abi;
pub mod encoder;
pub mod executor;
pub mod provider;
pub mod timelock;

use crate::chain::encoder::Encoder;
use crate::chain::family::ChainFamily;
use crate::chain::interface::{
    BlockChain, Executor, Inspector, TimelockConverter, TimelockExecutor, TransactionResult,
};
use crate::context::ExecContext;
use crate::error::{ChainError, EngineError};
use crate::proposal::{ChainSelector, TimelockAction};
use crate::registry::{ExecutorFactory, InspectorFactory, TimelockConverterFactory, TimelockExecutorFactory};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256, U64};
use log::debug;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use encoder::EvmEncoder;
pub use executor::{EvmExecutor, EvmInspector};
pub use provider::EthersClient;
pub use timelock::{EvmTimelockConverter, EvmTimelockExecutor};

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the engine needs from an EVM RPC endpoint. Dialing, failover and
/// retries of transient failures live behind this trait.
#[async_trait]
pub trait EvmClient: Send + Sync {
    /// Fills nonce, gas and fee fields.
    async fn fill_transaction(&self, tx: &mut TypedTransaction) -> Result<(), ChainError>;

    /// Broadcasts a signed RLP-encoded transaction, returning its hash.
    async fn send_transaction(&self, raw: Bytes) -> Result<H256, ChainError>;

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError>;

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// An EVM chain plus the deployer key that pays for and signs transactions.
pub struct EvmChain {
    selector: ChainSelector,
    chain_id: u64,
    client: Arc<dyn EvmClient>,
    deployer: LocalWallet,
}

impl fmt::Debug for EvmChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmChain")
            .field("selector", &self.selector)
            .field("chain_id", &self.chain_id)
            .field("deployer", &self.deployer.address())
            .finish()
    }
}

impl EvmChain {
    pub fn new(selector: ChainSelector, chain_id: u64, client: Arc<dyn EvmClient>, deployer: LocalWallet) -> Self {
        EvmChain { selector, chain_id, client, deployer: deployer.with_chain_id(chain_id) }
    }

    pub fn selector(&self) -> ChainSelector {
        self.selector
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn client(&self) -> &Arc<dyn EvmClient> {
        &self.client
    }

    pub fn deployer(&self) -> &LocalWallet {
        &self.deployer
    }

    /// Fills, signs with the deployer key and broadcasts a call to `to`.
    pub async fn send(&self, to: Address, data: Bytes, value: U256) -> Result<TransactionResult, ChainError> {
        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(self.deployer.address())
            .to(to)
            .data(data)
            .value(value)
            .chain_id(U64::from(self.chain_id))
            .into();
        self.client.fill_transaction(&mut tx).await?;
        let signature = self
            .deployer
            .sign_transaction_sync(&tx)
            .map_err(|e| ChainError::Encoding(format!("failed to sign transaction: {}", e)))?;
        let hash = self.client.send_transaction(tx.rlp_signed(&signature)).await?;
        debug!("[EvmChain {}] Sent transaction {:?} to {:?}", self.selector, hash, to);
        Ok(TransactionResult::evm(hash))
    }

    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.client.call(&tx).await
    }

    /// Polls for the receipt until it appears, then checks its status.
    pub async fn confirm(&self, ctx: &ExecContext, hash: H256, poll_interval: Duration) -> Result<(), EngineError> {
        let confirm_err =
            |source: ChainError| EngineError::Confirm { selector: self.selector, hash: format!("{:?}", hash), source };
        loop {
            let receipt = ctx.run(async { self.client.transaction_receipt(hash).await.map_err(confirm_err) }).await?;
            match receipt {
                Some(receipt) => {
                    // Pre-Byzantium receipts carry no status
                    return match receipt.status {
                        Some(status) if status != U64::one() => Err(confirm_err(ChainError::TransactionFailed(
                            format!("transaction reverted in block {:?}", receipt.block_number),
                        ))),
                        _ => Ok(()),
                    };
                }
                None => ctx.sleep(poll_interval).await?,
            }
        }
    }
}

fn evm_chain(chain: &BlockChain) -> Result<Arc<EvmChain>, EngineError> {
    match chain {
        BlockChain::Evm(evm) => Ok(evm.clone()),
        other => Err(EngineError::ClientMismatch { selector: other.selector(), expected: ChainFamily::Evm }),
    }
}

// --- Factories ---

pub struct EvmInspectorFactory;

impl InspectorFactory for EvmInspectorFactory {
    fn make(&self, chain: &BlockChain, _action: Option<TimelockAction>) -> Result<Arc<dyn Inspector>, EngineError> {
        Ok(Arc::new(EvmInspector::new(evm_chain(chain)?)))
    }
}

pub struct EvmTimelockConverterFactory;

impl TimelockConverterFactory for EvmTimelockConverterFactory {
    fn make(&self) -> Result<Arc<dyn TimelockConverter>, EngineError> {
        Ok(Arc::new(EvmTimelockConverter))
    }
}

pub struct EvmExecutorFactory;

impl ExecutorFactory for EvmExecutorFactory {
    fn make(
        &self,
        chain: &BlockChain,
        encoder: &Encoder,
        _action: Option<TimelockAction>,
    ) -> Result<Arc<dyn Executor>, EngineError> {
        let encoder = match encoder {
            Encoder::Evm(encoder) => encoder.clone(),
            other => return Err(EngineError::EncoderNotFound(other.selector())),
        };
        Ok(Arc::new(EvmExecutor::new(evm_chain(chain)?, encoder)))
    }
}

pub struct EvmTimelockExecutorFactory;

impl TimelockExecutorFactory for EvmTimelockExecutorFactory {
    fn make(&self, chain: &BlockChain) -> Result<Arc<dyn TimelockExecutor>, EngineError> {
        Ok(Arc::new(EvmTimelockExecutor::new(evm_chain(chain)?)))
    }

    // Timelock-triggered calls go out through a CallProxy
    fn requires_call_proxy(&self) -> bool {
        true
    }
}
