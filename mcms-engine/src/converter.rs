// Timelock proposal -> plain MCMS proposal

use crate::chain::interface::{ConvertRequest, TimelockConverter};
use crate::context::ExecContext;
use crate::engine::Engine;
use crate::error::{EngineError, ValidationError};
use crate::proposal::{ChainSelector, Proposal, ProposalKind, TimelockProposal};
use ethers::types::H256;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of converting a timelock proposal. `operation_ids[i]` and
/// `predecessors[i]` belong to batch `i` of the source proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvertedProposal {
    pub proposal: Proposal,
    pub operation_ids: Vec<H256>,
    pub predecessors: Vec<H256>,
    pub salt: H256,
}

impl TimelockProposal {
    /// Walks the batches in order, chaining each chain's batches through their
    /// predecessor ids. The source proposal is left untouched.
    pub async fn convert(
        &self,
        ctx: &ExecContext,
        converters: &BTreeMap<ChainSelector, Arc<dyn TimelockConverter>>,
    ) -> Result<ConvertedProposal, EngineError> {
        let salt = self.salt();
        let mut last_operation: BTreeMap<ChainSelector, H256> = BTreeMap::new();
        let mut operations = Vec::new();
        let mut operation_ids = Vec::with_capacity(self.operations.len());
        let mut predecessors = Vec::with_capacity(self.operations.len());

        for (index, batch) in self.operations.iter().enumerate() {
            let selector = batch.chain_selector;
            let converter = converters.get(&selector).ok_or(EngineError::ConverterNotFound(selector))?;
            let metadata = self
                .chain_metadata
                .get(&selector)
                .ok_or(ValidationError::MissingChainMetadata(selector))?;
            let timelock_address = self
                .timelock_addresses
                .get(&selector)
                .ok_or(ValidationError::MissingTimelockAddress(selector))?;
            let predecessor = last_operation.get(&selector).copied().unwrap_or_else(H256::zero);

            let request = ConvertRequest {
                metadata,
                timelock_address,
                batch,
                action: self.action,
                delay: self.delay,
                predecessor,
                salt,
            };
            let converted = ctx
                .run(async {
                    converter
                        .convert_batch(ctx, request)
                        .await
                        .map_err(|source| EngineError::Conversion { selector, index, source })
                })
                .await?;
            debug!("[Converter] Batch {} on chain {} -> operation {:?}", index, selector, converted.operation_id);

            last_operation.insert(selector, converted.operation_id);
            operation_ids.push(converted.operation_id);
            predecessors.push(predecessor);
            operations.extend(converted.operations);
        }

        let proposal = Proposal {
            version: self.version.clone(),
            kind: ProposalKind::Proposal,
            valid_until: self.valid_until,
            signatures: self.signatures.clone(),
            override_previous_root: self.override_previous_root,
            chain_metadata: self.chain_metadata.clone(),
            description: self.description.clone(),
            operations,
        };
        Ok(ConvertedProposal { proposal, operation_ids, predecessors, salt })
    }
}

impl Engine {
    /// One converter per chain in `chain_metadata`, by the chain's family.
    pub(crate) fn timelock_converters(
        &self,
        proposal: &TimelockProposal,
    ) -> Result<BTreeMap<ChainSelector, Arc<dyn TimelockConverter>>, EngineError> {
        proposal
            .chain_metadata
            .keys()
            .map(|selector| {
                let family = self.directory().family_of(*selector)?;
                let converter = self.registry().converter_factory(family)?.make()?;
                Ok((*selector, converter))
            })
            .collect()
    }

    pub async fn convert_timelock(
        &self,
        ctx: &ExecContext,
        proposal: &TimelockProposal,
    ) -> Result<ConvertedProposal, EngineError> {
        proposal.validate()?;
        let converters = self.timelock_converters(proposal)?;
        let converted = proposal.convert(ctx, &converters).await?;
        info!(
            "[Converter] Proposal {}: converted {} {} batches into {} operations",
            proposal.id(),
            proposal.operations.len(),
            proposal.action,
            converted.proposal.operations.len()
        );
        Ok(converted)
    }
}
