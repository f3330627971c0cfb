use crate::chain::family::ChainFamily;
use crate::datastore::DatastoreError;
use crate::proposal::{ChainSelector, ProposalKind};
use thiserror::Error;

/// Structural problems with a proposal. Always raised before any chain is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proposal version must not be empty")]
    EmptyVersion,

    #[error("expected a {expected} document, found {found}")]
    UnexpectedKind { expected: ProposalKind, found: ProposalKind },

    #[error("validUntil must be set")]
    MissingValidUntil,

    #[error("proposal has no operations")]
    NoOperations,

    #[error("batch operation {0} has no transactions")]
    EmptyBatch(usize),

    #[error("missing chain metadata for chain selector {0}")]
    MissingChainMetadata(ChainSelector),

    #[error("missing MCM address for chain selector {0}")]
    MissingMcmAddress(ChainSelector),

    #[error("missing timelock address for chain selector {0}")]
    MissingTimelockAddress(ChainSelector),
}

/// Failures reported by a chain's wire client or by family-specific encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    // Soft condition: the chain answered, the answer is "not yet"
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl ChainError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ChainError::NotReady(_))
    }
}

/// Error returned by every public engine operation.
///
/// Execution variants always carry the chain selector (and operation index where
/// one exists). Any execution error means the proposal may be partially applied
/// on-chain; inspect op counts before retrying.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("proposal validation failed: {0}")]
    Validation(#[from] ValidationError),

    // Resolution
    #[error("chain family not supported: {0}")]
    UnsupportedFamily(String),

    #[error("unknown chain selector {0}")]
    UnknownChainSelector(ChainSelector),

    #[error("blockchain not found for chain selector {0}")]
    BlockchainNotFound(ChainSelector),

    #[error("RBACTimelock address {address} not found on chain selector {selector}")]
    TimelockAddressNotFound { selector: ChainSelector, address: String },

    #[error("CallProxy not found for qualifier {qualifier:?} on chain selector {selector}")]
    CallProxyNotFound { selector: ChainSelector, qualifier: String },

    #[error("multiple CallProxy addresses found on chain selector {selector}: {addresses:?}")]
    AmbiguousCallProxy { selector: ChainSelector, addresses: Vec<String> },

    #[error("address store error: {0}")]
    Datastore(#[from] DatastoreError),

    // Factory / type gates
    #[error("encoder not found for chain selector {0}")]
    EncoderNotFound(ChainSelector),

    #[error("{family} does not support {role} on non-timelock proposals")]
    UnsupportedRole { family: ChainFamily, role: &'static str },

    #[error("blockchain for chain selector {selector} is not a {expected} chain")]
    ClientMismatch { selector: ChainSelector, expected: ChainFamily },

    #[error("no converter for chain selector {0}")]
    ConverterNotFound(ChainSelector),

    #[error("no executor for chain selector {0}")]
    ExecutorNotFound(ChainSelector),

    #[error("operation index {0} out of range")]
    OperationOutOfRange(usize),

    // Execution
    #[error("failed to encode proposal for chain selector {selector}: {source}")]
    Encoding { selector: ChainSelector, source: ChainError },

    #[error("failed to convert batch {index} for chain selector {selector}: {source}")]
    Conversion { selector: ChainSelector, index: usize, source: ChainError },

    #[error("failed to set root on chain selector {selector}: {source}")]
    SetRoot { selector: ChainSelector, source: ChainError },

    #[error("failed to execute operation {index} on chain selector {selector}: {source}")]
    Execute { selector: ChainSelector, index: usize, source: ChainError },

    #[error("failed to confirm transaction {hash} on chain selector {selector}: {source}")]
    Confirm { selector: ChainSelector, hash: String, source: ChainError },

    #[error("failed to execute timelock batch {index} on chain selector {selector}: {source}")]
    TimelockExecute { selector: ChainSelector, index: usize, source: ChainError },

    #[error("failed to inspect chain selector {selector}: {source}")]
    Inspection { selector: ChainSelector, source: ChainError },

    // Readiness: hard RPC failure vs. retry budget exhausted
    #[error("readiness check failed for batch {index} on chain selector {selector}: {source}")]
    Readiness { selector: ChainSelector, index: usize, source: ChainError },

    #[error("timelock proposal is not ready for execution after {attempts} attempts")]
    NotReady { attempts: u32 },

    // Signing
    #[error("proposal expired at {valid_until}")]
    Expired { valid_until: u32 },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    // Context
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    // Wire format
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for the soft readiness timeout, false for everything else.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, EngineError::NotReady { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_selector() {
        let err = EngineError::BlockchainNotFound(ChainSelector(42));
        assert_eq!(err.to_string(), "blockchain not found for chain selector 42");

        let err = EngineError::EncoderNotFound(ChainSelector(7));
        assert_eq!(err.to_string(), "encoder not found for chain selector 7");

        let err = EngineError::UnsupportedRole { family: ChainFamily::Aptos, role: "inspection" };
        assert_eq!(err.to_string(), "aptos does not support inspection on non-timelock proposals");
    }

    #[test]
    fn readiness_timeout_is_distinct_from_rpc_failure() {
        let soft = EngineError::NotReady { attempts: 50 };
        let hard = EngineError::Readiness {
            selector: ChainSelector(1),
            index: 0,
            source: ChainError::Rpc("connection reset".to_string()),
        };
        assert!(soft.is_not_ready());
        assert!(!hard.is_not_ready());
        assert!(soft.to_string().contains("not ready for execution"));
    }

    #[test]
    fn execution_errors_expose_their_source() {
        use std::error::Error as _;
        let err = EngineError::Execute {
            selector: ChainSelector(3),
            index: 2,
            source: ChainError::TransactionFailed("reverted".to_string()),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("operation 2"));
    }
}
