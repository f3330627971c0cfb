// JSON wire format shared by signers and executors

use crate::error::{EngineError, ValidationError};
use crate::proposal::types::{Proposal, ProposalKind, TimelockProposal};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

// Length of the hex id used in logs and error context
const PROPOSAL_ID_BYTES: usize = 8;

fn check_kind(found: ProposalKind, expected: ProposalKind) -> Result<(), EngineError> {
    if found != expected {
        return Err(ValidationError::UnexpectedKind { expected, found }.into());
    }
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<String, EngineError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T, EngineError> {
    Ok(serde_json::from_str(json)?)
}

fn short_id<T: Serialize>(value: &T) -> String {
    match serde_json::to_vec(value) {
        Ok(bytes) => hex::encode(&blake3::hash(&bytes).as_bytes()[..PROPOSAL_ID_BYTES]),
        Err(_) => "unknown".to_string(),
    }
}

impl Proposal {
    pub fn to_json(&self) -> Result<String, EngineError> {
        encode(self)
    }

    /// Decodes a `Proposal` document; a document of any other kind is rejected.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let proposal: Proposal = decode(json)?;
        check_kind(proposal.kind, ProposalKind::Proposal)?;
        Ok(proposal)
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, EngineError> {
        let mut json = String::new();
        reader.read_to_string(&mut json)?;
        Self::from_json(&json)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), EngineError> {
        writer.write_all(self.to_json()?.as_bytes())?;
        Ok(())
    }

    /// Short stable id over the authorized content (signatures excluded).
    pub fn id(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.signatures.clear();
        short_id(&unsigned)
    }
}

impl TimelockProposal {
    pub fn to_json(&self) -> Result<String, EngineError> {
        encode(self)
    }

    /// Decodes a `TimelockProposal` document; a document of any other kind is rejected.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let proposal: TimelockProposal = decode(json)?;
        check_kind(proposal.kind, ProposalKind::TimelockProposal)?;
        Ok(proposal)
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, EngineError> {
        let mut json = String::new();
        reader.read_to_string(&mut json)?;
        Self::from_json(&json)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), EngineError> {
        writer.write_all(self.to_json()?.as_bytes())?;
        Ok(())
    }

    /// Short stable id over the authorized content (signatures excluded).
    pub fn id(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.signatures.clear();
        short_id(&unsigned)
    }
}
