// Merkle commitment over a proposal and the payload signers sign

use crate::chain::encoder::Encoder;
use crate::error::EngineError;
use crate::proposal::types::{ChainSelector, Proposal};
use ethers::abi::{self, Token};
use ethers::types::{H256, U256};
use ethers::utils::{hash_message, keccak256};
use std::collections::BTreeMap;

/// Keccak merkle tree with sorted-pair hashing.
///
/// An odd node at the end of a layer is promoted unchanged, so proofs for such
/// nodes are simply shorter.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    layers: Vec<Vec<H256>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<H256>) -> Self {
        let mut layers = vec![leaves];
        while layers.last().map_or(false, |layer| layer.len() > 1) {
            let current = &layers[layers.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(*left, *right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            layers.push(next);
        }
        MerkleTree { layers }
    }

    pub fn root(&self) -> H256 {
        self.layers.last().and_then(|layer| layer.first()).copied().unwrap_or_default()
    }

    pub fn leaves(&self) -> &[H256] {
        &self.layers[0]
    }

    /// Sibling path from leaf `index` to the root, or None if out of range.
    pub fn proof(&self, index: usize) -> Option<Vec<H256>> {
        if index >= self.leaves().len() {
            return None;
        }
        let mut proof = Vec::new();
        let mut position = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            if let Some(sibling) = layer.get(position ^ 1) {
                proof.push(*sibling);
            }
            position /= 2;
        }
        Some(proof)
    }

    pub fn verify(root: H256, leaf: H256, proof: &[H256]) -> bool {
        proof.iter().fold(leaf, |acc, sibling| hash_pair(acc, *sibling)) == root
    }
}

pub fn hash_pair(a: H256, b: H256) -> H256 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(low.as_bytes());
    buf[32..].copy_from_slice(high.as_bytes());
    H256::from(keccak256(buf))
}

/// EIP-191 hash of `keccak256(abi.encode(root, validUntil))`.
pub fn signing_hash(root: H256, valid_until: u32) -> H256 {
    let encoded = abi::encode(&[Token::FixedBytes(root.as_bytes().to_vec()), Token::Uint(U256::from(valid_until))]);
    hash_message(keccak256(encoded))
}

/// Merkle tree of one proposal: every chain's metadata leaf (ascending
/// selector), then one leaf per operation in array order.
#[derive(Clone, Debug)]
pub struct ProposalTree {
    tree: MerkleTree,
    metadata_index: BTreeMap<ChainSelector, usize>,
    nonces: Vec<u64>,
}

impl ProposalTree {
    pub fn build(proposal: &Proposal, encoders: &BTreeMap<ChainSelector, Encoder>) -> Result<Self, EngineError> {
        let mut leaves = Vec::with_capacity(proposal.chain_metadata.len() + proposal.operations.len());
        let mut metadata_index = BTreeMap::new();

        for (selector, metadata) in &proposal.chain_metadata {
            let encoder = encoders.get(selector).ok_or(EngineError::EncoderNotFound(*selector))?;
            let leaf = encoder
                .hash_metadata(metadata)
                .map_err(|source| EngineError::Encoding { selector: *selector, source })?;
            metadata_index.insert(*selector, leaves.len());
            leaves.push(leaf);
        }

        let mut next_nonce: BTreeMap<ChainSelector, u64> = proposal
            .chain_metadata
            .iter()
            .map(|(selector, metadata)| (*selector, metadata.starting_op_count))
            .collect();
        let mut nonces = Vec::with_capacity(proposal.operations.len());

        for op in &proposal.operations {
            let selector = op.chain_selector;
            let metadata = proposal
                .chain_metadata
                .get(&selector)
                .ok_or(crate::error::ValidationError::MissingChainMetadata(selector))?;
            let encoder = encoders.get(&selector).ok_or(EngineError::EncoderNotFound(selector))?;
            let nonce = next_nonce.entry(selector).or_insert(metadata.starting_op_count);
            let leaf = encoder
                .hash_operation(metadata, *nonce, op)
                .map_err(|source| EngineError::Encoding { selector, source })?;
            nonces.push(*nonce);
            *nonce += 1;
            leaves.push(leaf);
        }

        Ok(ProposalTree { tree: MerkleTree::new(leaves), metadata_index, nonces })
    }

    pub fn root(&self) -> H256 {
        self.tree.root()
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn metadata_proof(&self, selector: ChainSelector) -> Result<Vec<H256>, EngineError> {
        self.metadata_index
            .get(&selector)
            .and_then(|index| self.tree.proof(*index))
            .ok_or(EngineError::EncoderNotFound(selector))
    }

    pub fn operation_proof(&self, index: usize) -> Result<Vec<H256>, EngineError> {
        if index >= self.nonces.len() {
            return Err(EngineError::OperationOutOfRange(index));
        }
        self.tree
            .proof(self.metadata_index.len() + index)
            .ok_or(EngineError::OperationOutOfRange(index))
    }

    /// On-chain nonce of operation `index`: the chain's starting op count plus
    /// the number of earlier operations on the same chain.
    pub fn nonce(&self, index: usize) -> Result<u64, EngineError> {
        self.nonces.get(index).copied().ok_or(EngineError::OperationOutOfRange(index))
    }

    pub fn signing_hash(&self, valid_until: u32) -> H256 {
        signing_hash(self.root(), valid_until)
    }
}
