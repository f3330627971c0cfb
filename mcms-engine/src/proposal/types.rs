// Define the proposal value objects and their wire representation

use crate::chain::encoder::Encoder;
use crate::chain::family::ChainDirectory;
use crate::error::EngineError;
use ethers::types::{Address, Bytes, RecoveryMessage, Signature as EthSignature, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque numeric identifier of one chain instance.
///
/// Serialized as a plain number, and as a decimal string when used as a map key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainSelector(pub u64);

impl fmt::Display for ChainSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainSelector {
    fn from(value: u64) -> Self {
        ChainSelector(value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMetadata {
    pub starting_op_count: u64,
    pub mcm_address: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub additional_fields: serde_json::Value,
}

impl ChainMetadata {
    pub fn new(starting_op_count: u64, mcm_address: impl Into<String>) -> Self {
        ChainMetadata {
            starting_op_count,
            mcm_address: mcm_address.into(),
            additional_fields: serde_json::Value::Null,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One call on one chain. `additional_fields` is family-specific and opaque here
/// (EVM: `value`; Solana: `accounts`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(flatten)]
    pub operation_metadata: OperationMetadata,
    pub to: String,
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub additional_fields: serde_json::Value,
}

impl Transaction {
    pub fn new(to: impl Into<String>, data: impl Into<Bytes>, contract_type: impl Into<String>) -> Self {
        Transaction {
            operation_metadata: OperationMetadata { contract_type: contract_type.into(), tags: Vec::new() },
            to: to.into(),
            data: data.into(),
            additional_fields: serde_json::Value::Null,
        }
    }

    pub fn with_additional_fields(mut self, fields: serde_json::Value) -> Self {
        self.additional_fields = fields;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operation_metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub chain_selector: ChainSelector,
    pub transaction: Transaction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub chain_selector: ChainSelector,
    pub transactions: Vec<Transaction>,
}

/// ECDSA signature over a proposal's signing hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "R")]
    pub r: H256,
    #[serde(rename = "S")]
    pub s: H256,
    #[serde(rename = "V")]
    pub v: u8,
}

impl Signature {
    /// Recovers the signer address for `hash` (the EIP-191 signing hash).
    pub fn recover(&self, hash: H256) -> Result<Address, EngineError> {
        EthSignature::from(*self)
            .recover(RecoveryMessage::Hash(hash))
            .map_err(|e| EngineError::InvalidSignature(e.to_string()))
    }
}

impl From<EthSignature> for Signature {
    fn from(signature: EthSignature) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);
        Signature { r: H256::from(r), s: H256::from(s), v: signature.v as u8 }
    }
}

impl From<Signature> for EthSignature {
    fn from(signature: Signature) -> Self {
        EthSignature {
            r: U256::from_big_endian(signature.r.as_bytes()),
            s: U256::from_big_endian(signature.s.as_bytes()),
            v: signature.v as u64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalKind {
    Proposal,
    TimelockProposal,
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalKind::Proposal => write!(f, "Proposal"),
            ProposalKind::TimelockProposal => write!(f, "TimelockProposal"),
        }
    }
}

/// Schedule is two-phase (MCMS authorization, then timelock execution once
/// ready); Cancel and Bypass complete with the MCMS phase alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelockAction {
    Schedule,
    Cancel,
    Bypass,
}

impl fmt::Display for TimelockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelockAction::Schedule => write!(f, "schedule"),
            TimelockAction::Cancel => write!(f, "cancel"),
            TimelockAction::Bypass => write!(f, "bypass"),
        }
    }
}

/// A signed batch of operations executed directly through each chain's MCMS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub version: String,
    pub kind: ProposalKind,
    pub valid_until: u32,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default)]
    pub override_previous_root: bool,
    pub chain_metadata: BTreeMap<ChainSelector, ChainMetadata>,
    #[serde(default)]
    pub description: String,
    pub operations: Vec<Operation>,
}

impl Proposal {
    pub fn new(
        version: impl Into<String>,
        valid_until: u32,
        chain_metadata: BTreeMap<ChainSelector, ChainMetadata>,
        operations: Vec<Operation>,
    ) -> Self {
        Proposal {
            version: version.into(),
            kind: ProposalKind::Proposal,
            valid_until,
            signatures: Vec::new(),
            override_previous_root: false,
            chain_metadata,
            description: String::new(),
            operations,
        }
    }

    /// Number of operations targeting each chain in `chain_metadata`.
    pub fn tx_counts(&self) -> BTreeMap<ChainSelector, u64> {
        let mut counts: BTreeMap<ChainSelector, u64> =
            self.chain_metadata.keys().map(|selector| (*selector, 0)).collect();
        for op in &self.operations {
            *counts.entry(op.chain_selector).or_insert(0) += 1;
        }
        counts
    }

    /// Builds one encoder per chain, with the family and chain id taken from `directory`.
    pub fn encoders(&self, directory: &ChainDirectory) -> Result<BTreeMap<ChainSelector, Encoder>, EngineError> {
        self.encoders_for(directory, None)
    }

    /// Same as `encoders`, for a proposal converted from a timelock `action`.
    pub fn encoders_for(
        &self,
        directory: &ChainDirectory,
        action: Option<TimelockAction>,
    ) -> Result<BTreeMap<ChainSelector, Encoder>, EngineError> {
        let counts = self.tx_counts();
        self.chain_metadata
            .keys()
            .map(|selector| {
                let details = directory.details(*selector)?;
                let tx_count = counts.get(selector).copied().unwrap_or(0);
                let encoder =
                    Encoder::new(details, *selector, tx_count, self.override_previous_root).for_action(action);
                Ok((*selector, encoder))
            })
            .collect()
    }
}

/// A proposal whose operations are routed through each chain's timelock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockProposal {
    pub version: String,
    pub kind: ProposalKind,
    pub valid_until: u32,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default)]
    pub override_previous_root: bool,
    pub chain_metadata: BTreeMap<ChainSelector, ChainMetadata>,
    #[serde(default)]
    pub description: String,
    pub action: TimelockAction,
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,
    pub timelock_addresses: BTreeMap<ChainSelector, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt_override: Option<H256>,
    pub operations: Vec<BatchOperation>,
}

impl TimelockProposal {
    pub fn new(
        version: impl Into<String>,
        valid_until: u32,
        action: TimelockAction,
        chain_metadata: BTreeMap<ChainSelector, ChainMetadata>,
        timelock_addresses: BTreeMap<ChainSelector, String>,
        operations: Vec<BatchOperation>,
    ) -> Self {
        TimelockProposal {
            version: version.into(),
            kind: ProposalKind::TimelockProposal,
            valid_until,
            signatures: Vec::new(),
            override_previous_root: false,
            chain_metadata,
            description: String::new(),
            action,
            delay: Duration::ZERO,
            timelock_addresses,
            salt_override: None,
            operations,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Salt shared by every batch: the override when present, otherwise derived from `valid_until`.
    pub fn salt(&self) -> H256 {
        match self.salt_override {
            Some(salt) => salt,
            None => {
                let encoded = ethers::abi::encode(&[ethers::abi::Token::Uint(U256::from(self.valid_until))]);
                H256::from(ethers::utils::keccak256(encoded))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    #[test]
    fn tx_counts_cover_every_chain() {
        let mut metadata = BTreeMap::new();
        metadata.insert(ChainSelector(1), ChainMetadata::new(0, "0x01"));
        metadata.insert(ChainSelector(2), ChainMetadata::new(5, "0x02"));
        let ops = vec![
            Operation { chain_selector: ChainSelector(1), transaction: Transaction::new("0xaa", vec![1u8], "T") },
            Operation { chain_selector: ChainSelector(1), transaction: Transaction::new("0xbb", vec![2u8], "T") },
        ];
        let proposal = Proposal::new("v1", 100, metadata, ops);
        let counts = proposal.tx_counts();
        assert_eq!(counts.get(&ChainSelector(1)), Some(&2));
        assert_eq!(counts.get(&ChainSelector(2)), Some(&0));
    }

    #[test]
    fn signature_survives_ethers_conversion_and_recovers_signer() {
        let wallet = LocalWallet::from_bytes(&[7u8; 32]).unwrap();
        let hash = H256::from(ethers::utils::keccak256(b"payload"));
        let signature: Signature = wallet.sign_hash(hash).unwrap().into();
        assert!(signature.v == 27 || signature.v == 28);
        assert_eq!(signature.recover(hash).unwrap(), wallet.address());
    }

    #[test]
    fn salt_override_wins() {
        let mut proposal = TimelockProposal::new(
            "v1",
            1_900_000_000,
            TimelockAction::Schedule,
            BTreeMap::new(),
            BTreeMap::new(),
            Vec::new(),
        );
        let derived = proposal.salt();
        assert_ne!(derived, H256::zero());
        proposal.salt_override = Some(H256::repeat_byte(9));
        assert_eq!(proposal.salt(), H256::repeat_byte(9));
    }
}
