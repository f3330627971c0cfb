use crate::error::ValidationError;
use crate::proposal::types::{ChainMetadata, ChainSelector, Proposal, ProposalKind, TimelockProposal};
use std::collections::BTreeMap;

fn validate_base(
    version: &str,
    kind: ProposalKind,
    expected: ProposalKind,
    valid_until: u32,
    chain_metadata: &BTreeMap<ChainSelector, ChainMetadata>,
) -> Result<(), ValidationError> {
    if version.trim().is_empty() {
        return Err(ValidationError::EmptyVersion);
    }
    if kind != expected {
        return Err(ValidationError::UnexpectedKind { expected, found: kind });
    }
    if valid_until == 0 {
        return Err(ValidationError::MissingValidUntil);
    }
    for (selector, metadata) in chain_metadata {
        if metadata.mcm_address.trim().is_empty() {
            return Err(ValidationError::MissingMcmAddress(*selector));
        }
    }
    Ok(())
}

impl Proposal {
    /// Structural checks only; never touches a chain.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_base(&self.version, self.kind, ProposalKind::Proposal, self.valid_until, &self.chain_metadata)?;
        if self.operations.is_empty() {
            return Err(ValidationError::NoOperations);
        }
        for op in &self.operations {
            if !self.chain_metadata.contains_key(&op.chain_selector) {
                return Err(ValidationError::MissingChainMetadata(op.chain_selector));
            }
        }
        Ok(())
    }
}

impl TimelockProposal {
    /// Structural checks only; never touches a chain.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_base(
            &self.version,
            self.kind,
            ProposalKind::TimelockProposal,
            self.valid_until,
            &self.chain_metadata,
        )?;
        if self.operations.is_empty() {
            return Err(ValidationError::NoOperations);
        }
        for (index, batch) in self.operations.iter().enumerate() {
            if batch.transactions.is_empty() {
                return Err(ValidationError::EmptyBatch(index));
            }
            if !self.chain_metadata.contains_key(&batch.chain_selector) {
                return Err(ValidationError::MissingChainMetadata(batch.chain_selector));
            }
            let has_timelock = self
                .timelock_addresses
                .get(&batch.chain_selector)
                .map_or(false, |address| !address.trim().is_empty());
            if !has_timelock {
                return Err(ValidationError::MissingTimelockAddress(batch.chain_selector));
            }
        }
        Ok(())
    }
}
