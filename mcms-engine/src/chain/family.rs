use crate::error::EngineError;
use crate::proposal::ChainSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Class of chains sharing a transaction and addressing model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
    Aptos,
}

impl ChainFamily {
    pub const ALL: [ChainFamily; 3] = [ChainFamily::Evm, ChainFamily::Solana, ChainFamily::Aptos];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
            ChainFamily::Aptos => "aptos",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainFamily {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evm" => Ok(ChainFamily::Evm),
            "solana" => Ok(ChainFamily::Solana),
            "aptos" => Ok(ChainFamily::Aptos),
            _ => Err(EngineError::UnsupportedFamily(s.to_string())),
        }
    }
}

/// What the engine needs to know about a selector before touching the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDetails {
    pub family: ChainFamily,
    // Native chain id as the family's contracts see it (EIP-155 id for EVM)
    pub chain_id: u64,
    pub name: String,
}

impl ChainDetails {
    pub fn new(family: ChainFamily, chain_id: u64, name: impl Into<String>) -> Self {
        ChainDetails { family, chain_id, name: name.into() }
    }
}

// Well-known selectors shipped with the default directory
const WELL_KNOWN: &[(u64, ChainFamily, u64, &str)] = &[
    (5009297550715157269, ChainFamily::Evm, 1, "ethereum-mainnet"),
    (16015286601757825753, ChainFamily::Evm, 11155111, "ethereum-testnet-sepolia"),
    (3379446385462418246, ChainFamily::Evm, 1337, "geth-testnet"),
    (124615329519749607, ChainFamily::Solana, 0, "solana-mainnet"),
    (16423721717087811551, ChainFamily::Solana, 0, "solana-devnet"),
    (4741433654826277614, ChainFamily::Aptos, 1, "aptos-mainnet"),
    (743186221051783445, ChainFamily::Aptos, 2, "aptos-testnet"),
];

/// Selector lookup table. `Default` carries the well-known chains; custom
/// deployments (local devnets, forks) are added with `register`.
#[derive(Clone, Debug)]
pub struct ChainDirectory {
    entries: BTreeMap<ChainSelector, ChainDetails>,
}

impl Default for ChainDirectory {
    fn default() -> Self {
        let entries = WELL_KNOWN
            .iter()
            .map(|(selector, family, chain_id, name)| {
                (ChainSelector(*selector), ChainDetails::new(*family, *chain_id, *name))
            })
            .collect();
        ChainDirectory { entries }
    }
}

impl ChainDirectory {
    pub fn empty() -> Self {
        ChainDirectory { entries: BTreeMap::new() }
    }

    /// Adds or replaces a selector.
    pub fn register(&mut self, selector: ChainSelector, details: ChainDetails) -> &mut Self {
        self.entries.insert(selector, details);
        self
    }

    pub fn with(mut self, selector: ChainSelector, details: ChainDetails) -> Self {
        self.register(selector, details);
        self
    }

    pub fn details(&self, selector: ChainSelector) -> Result<&ChainDetails, EngineError> {
        self.entries.get(&selector).ok_or(EngineError::UnknownChainSelector(selector))
    }

    pub fn family_of(&self, selector: ChainSelector) -> Result<ChainFamily, EngineError> {
        self.details(selector).map(|details| details.family)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
