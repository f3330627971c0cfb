use crate::chain::encoder::Encoder;
use crate::chain::interface::{BlockChain, ExecuteRequest, Executor, SetRootRequest, TransactionResult};
use crate::context::ExecContext;
use crate::engine::Engine;
use crate::error::{EngineError, ValidationError};
use crate::proposal::{ChainSelector, Proposal, ProposalTree, Signature, TimelockAction};
use ethers::types::{Address, H256};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A proposal ready to be sent: merkle tree built once, signatures sorted by
/// signer address (the multisig rejects unsorted signer lists).
pub struct Executable<'a> {
    proposal: &'a Proposal,
    tree: ProposalTree,
    signatures: Vec<Signature>,
    executors: BTreeMap<ChainSelector, Arc<dyn Executor>>,
}

impl<'a> Executable<'a> {
    pub fn new(
        proposal: &'a Proposal,
        encoders: &BTreeMap<ChainSelector, Encoder>,
        executors: BTreeMap<ChainSelector, Arc<dyn Executor>>,
    ) -> Result<Self, EngineError> {
        let tree = ProposalTree::build(proposal, encoders)?;
        let hash = tree.signing_hash(proposal.valid_until);
        let mut signed: Vec<(Address, Signature)> = proposal
            .signatures
            .iter()
            .map(|signature| Ok((signature.recover(hash)?, *signature)))
            .collect::<Result<_, EngineError>>()?;
        signed.sort_by_key(|(signer, _)| *signer);
        let signatures = signed.into_iter().map(|(_, signature)| signature).collect();
        Ok(Executable { proposal, tree, signatures, executors })
    }

    pub fn root(&self) -> H256 {
        self.tree.root()
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    fn executor(&self, selector: ChainSelector) -> Result<&Arc<dyn Executor>, EngineError> {
        self.executors.get(&selector).ok_or(EngineError::ExecutorNotFound(selector))
    }

    pub async fn set_root(&self, ctx: &ExecContext, selector: ChainSelector) -> Result<TransactionResult, EngineError> {
        let metadata = self
            .proposal
            .chain_metadata
            .get(&selector)
            .ok_or(ValidationError::MissingChainMetadata(selector))?;
        let request = SetRootRequest {
            metadata,
            metadata_proof: self.tree.metadata_proof(selector)?,
            root: self.root(),
            valid_until: self.proposal.valid_until,
            signatures: &self.signatures,
        };
        let executor = self.executor(selector)?;
        ctx.run(async {
            executor
                .set_root(ctx, request)
                .await
                .map_err(|source| EngineError::SetRoot { selector, source })
        })
        .await
    }

    pub async fn execute(&self, ctx: &ExecContext, index: usize) -> Result<TransactionResult, EngineError> {
        let operation = self.proposal.operations.get(index).ok_or(EngineError::OperationOutOfRange(index))?;
        let selector = operation.chain_selector;
        let metadata = self
            .proposal
            .chain_metadata
            .get(&selector)
            .ok_or(ValidationError::MissingChainMetadata(selector))?;
        let request = ExecuteRequest {
            metadata,
            operation,
            nonce: self.tree.nonce(index)?,
            proof: self.tree.operation_proof(index)?,
            root: self.root(),
            valid_until: self.proposal.valid_until,
        };
        let executor = self.executor(selector)?;
        ctx.run(async {
            executor
                .execute_operation(ctx, request)
                .await
                .map_err(|source| EngineError::Execute { selector, index, source })
        })
        .await
    }
}

impl Engine {
    /// Sets the root on every chain, then executes every operation in order,
    /// confirming each transaction before sending the next.
    ///
    /// Nothing is rolled back on failure; the returned error names the chain
    /// and operation that failed.
    pub async fn execute_mcms(&self, ctx: &ExecContext, proposal: &Proposal) -> Result<(), EngineError> {
        proposal.validate()?;
        let chains = self.resolve_blockchains(proposal.chain_metadata.keys().copied())?;
        self.run_mcms(ctx, proposal, None, &chains).await
    }

    pub(crate) async fn run_mcms(
        &self,
        ctx: &ExecContext,
        proposal: &Proposal,
        action: Option<TimelockAction>,
        chains: &BTreeMap<ChainSelector, BlockChain>,
    ) -> Result<(), EngineError> {
        let id = proposal.id();
        let result = self.send_mcms(ctx, &id, proposal, action, chains).await;
        if let Err(e) = &result {
            warn!("[Executor] Proposal {}: aborted: {}", id, e);
        }
        result
    }

    async fn send_mcms(
        &self,
        ctx: &ExecContext,
        id: &str,
        proposal: &Proposal,
        action: Option<TimelockAction>,
        chains: &BTreeMap<ChainSelector, BlockChain>,
    ) -> Result<(), EngineError> {
        let chain = |selector: ChainSelector| chains.get(&selector).ok_or(EngineError::BlockchainNotFound(selector));

        let encoders = proposal.encoders_for(self.directory(), action)?;
        let mut executors = BTreeMap::new();
        for (selector, encoder) in &encoders {
            let factory = self.registry().executor_factory(encoder.family())?;
            executors.insert(*selector, factory.make(chain(*selector)?, encoder, action)?);
        }
        let executable = Executable::new(proposal, &encoders, executors)?;

        for selector in proposal.chain_metadata.keys() {
            info!("[Executor] Proposal {}: setting root {:?} on chain {}", id, executable.root(), selector);
            let result = executable.set_root(ctx, *selector).await?;
            self.confirm(ctx, chain(*selector)?, &result).await?;
        }

        for (index, operation) in proposal.operations.iter().enumerate() {
            info!("[Executor] Proposal {}: executing operation {} on chain {}", id, index, operation.chain_selector);
            let result = executable.execute(ctx, index).await?;
            self.confirm(ctx, chain(operation.chain_selector)?, &result).await?;
        }

        info!("[Executor] Proposal {}: {} operations executed", id, proposal.operations.len());
        Ok(())
    }
}
