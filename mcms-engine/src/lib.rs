// Multi-chain MCMS proposal engine: conversion, signing and execution of
// governance proposals across heterogeneous chain families.

pub mod chain;
pub mod config;
pub mod context;
pub mod converter;
pub mod datastore;
pub mod engine;
pub mod error;
pub mod executor;
pub mod inspect;
pub mod proposal;
pub mod registry;
pub mod signer;
pub mod timelock;

pub mod test_utils; // Mock wire clients and fixtures shared by unit and integration tests

// Re-export the surface most callers need
pub use config::EngineConfig;
pub use context::ExecContext;
pub use engine::Engine;
pub use error::{ChainError, EngineError, ValidationError};
pub use proposal::{
    BatchOperation, ChainMetadata, ChainSelector, Operation, Proposal, ProposalKind, Signature,
    TimelockAction, TimelockProposal, Transaction,
};
