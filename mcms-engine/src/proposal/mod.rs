// Proposal model: value objects exchanged between signers and executors

pub mod codec;
pub mod merkle;
pub mod types;
pub mod validation;

// Re-export key types
pub use merkle::{MerkleTree, ProposalTree};
pub use types::{
    BatchOperation, ChainMetadata, ChainSelector, Operation, OperationMetadata, Proposal,
    ProposalKind, Signature, TimelockAction, TimelockProposal, Transaction,
};
