// On-chain op counts, for checking how far a failed execution got before retrying

use crate::context::ExecContext;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::proposal::{ChainMetadata, ChainSelector, Proposal, TimelockAction, TimelockProposal};
use log::debug;
use std::collections::BTreeMap;

impl Engine {
    pub async fn op_counts(
        &self,
        ctx: &ExecContext,
        proposal: &Proposal,
    ) -> Result<BTreeMap<ChainSelector, u64>, EngineError> {
        proposal.validate()?;
        self.read_op_counts(ctx, &proposal.chain_metadata, None).await
    }

    pub async fn timelock_op_counts(
        &self,
        ctx: &ExecContext,
        proposal: &TimelockProposal,
    ) -> Result<BTreeMap<ChainSelector, u64>, EngineError> {
        proposal.validate()?;
        self.read_op_counts(ctx, &proposal.chain_metadata, Some(proposal.action)).await
    }

    async fn read_op_counts(
        &self,
        ctx: &ExecContext,
        chain_metadata: &BTreeMap<ChainSelector, ChainMetadata>,
        action: Option<TimelockAction>,
    ) -> Result<BTreeMap<ChainSelector, u64>, EngineError> {
        let chains = self.resolve_blockchains(chain_metadata.keys().copied())?;
        let mut counts = BTreeMap::new();
        for (selector, metadata) in chain_metadata {
            let chain = &chains[selector];
            let family = self.directory().family_of(*selector)?;
            let inspector = self.registry().inspector_factory(family)?.make(chain, action)?;
            let count = ctx
                .run(async {
                    inspector
                        .op_count(ctx, &metadata.mcm_address)
                        .await
                        .map_err(|source| EngineError::Inspection { selector: *selector, source })
                })
                .await?;
            debug!(
                "[Inspector] Chain {}: op count {} (expected start {})",
                selector, count, metadata.starting_op_count
            );
            counts.insert(*selector, count);
        }
        Ok(counts)
    }
}
