use crate::chain::aptos::{AptosEncoder, AptosRole};
use crate::chain::evm::encoder::EvmEncoder;
use crate::chain::family::{ChainDetails, ChainFamily};
use crate::chain::solana::SolanaEncoder;
use crate::error::ChainError;
use crate::proposal::{ChainMetadata, ChainSelector, Operation, TimelockAction};
use ethers::types::H256;

/// Per-chain leaf encoder. One variant per family; executors check the
/// variant matches their own family before using it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoder {
    Evm(EvmEncoder),
    Solana(SolanaEncoder),
    Aptos(AptosEncoder),
}

impl Encoder {
    pub fn new(details: &ChainDetails, selector: ChainSelector, tx_count: u64, override_previous_root: bool) -> Self {
        match details.family {
            ChainFamily::Evm => {
                Encoder::Evm(EvmEncoder::new(selector, details.chain_id, tx_count, override_previous_root))
            }
            ChainFamily::Solana => {
                Encoder::Solana(SolanaEncoder::new(selector, details.chain_id, tx_count, override_previous_root))
            }
            ChainFamily::Aptos => Encoder::Aptos(AptosEncoder::new(
                selector,
                details.chain_id,
                tx_count,
                override_previous_root,
                AptosRole::Proposer,
            )),
        }
    }

    /// Aptos leaves commit to the MCMS role, which follows from the timelock action.
    pub fn for_action(self, action: Option<TimelockAction>) -> Self {
        match (self, action) {
            (Encoder::Aptos(encoder), Some(action)) => Encoder::Aptos(encoder.with_role(AptosRole::from(action))),
            (encoder, _) => encoder,
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Encoder::Evm(_) => ChainFamily::Evm,
            Encoder::Solana(_) => ChainFamily::Solana,
            Encoder::Aptos(_) => ChainFamily::Aptos,
        }
    }

    pub fn selector(&self) -> ChainSelector {
        match self {
            Encoder::Evm(encoder) => encoder.selector,
            Encoder::Solana(encoder) => encoder.selector,
            Encoder::Aptos(encoder) => encoder.selector,
        }
    }

    pub fn hash_metadata(&self, metadata: &ChainMetadata) -> Result<H256, ChainError> {
        match self {
            Encoder::Evm(encoder) => encoder.hash_metadata(metadata),
            Encoder::Solana(encoder) => encoder.hash_metadata(metadata),
            Encoder::Aptos(encoder) => encoder.hash_metadata(metadata),
        }
    }

    pub fn hash_operation(&self, metadata: &ChainMetadata, nonce: u64, op: &Operation) -> Result<H256, ChainError> {
        match self {
            Encoder::Evm(encoder) => encoder.hash_operation(metadata, nonce, op),
            Encoder::Solana(encoder) => encoder.hash_operation(metadata, nonce, op),
            Encoder::Aptos(encoder) => encoder.hash_operation(metadata, nonce, op),
        }
    }
}
