// Address catalog of deployed contracts, keyed by (chain, type, version, qualifier)

use crate::proposal::ChainSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

pub const CALL_PROXY: &str = "CallProxy";
pub const RBAC_TIMELOCK: &str = "RBACTimelock";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRefKey {
    pub chain_selector: ChainSelector,
    pub contract_type: String,
    pub version: String,
    pub qualifier: String,
}

impl fmt::Display for AddressRefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.chain_selector, self.contract_type, self.version)?;
        if !self.qualifier.is_empty() {
            write!(f, "[{}]", self.qualifier)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRef {
    pub chain_selector: ChainSelector,
    pub contract_type: String,
    pub version: String,
    #[serde(default)]
    pub qualifier: String,
    pub address: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl AddressRef {
    pub fn new(
        chain_selector: ChainSelector,
        contract_type: impl Into<String>,
        version: impl Into<String>,
        qualifier: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        AddressRef {
            chain_selector,
            contract_type: contract_type.into(),
            version: version.into(),
            qualifier: qualifier.into(),
            address: address.into(),
            labels: Vec::new(),
        }
    }

    pub fn key(&self) -> AddressRefKey {
        AddressRefKey {
            chain_selector: self.chain_selector,
            contract_type: self.contract_type.clone(),
            version: self.version.clone(),
            qualifier: self.qualifier.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    #[error("address ref {0} not found")]
    NotFound(AddressRefKey),

    #[error("address ref {0} already exists")]
    Duplicate(AddressRefKey),

    #[error("address store unavailable: {0}")]
    Unavailable(String),
}

/// One predicate over an `AddressRef`; a filter list matches when all match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressRefFilter {
    ChainSelector(ChainSelector),
    ContractType(String),
    Version(String),
    Qualifier(String),
    // Case-insensitive
    Address(String),
}

impl AddressRefFilter {
    pub fn matches(&self, address_ref: &AddressRef) -> bool {
        match self {
            AddressRefFilter::ChainSelector(selector) => address_ref.chain_selector == *selector,
            AddressRefFilter::ContractType(contract_type) => address_ref.contract_type == *contract_type,
            AddressRefFilter::Version(version) => address_ref.version == *version,
            AddressRefFilter::Qualifier(qualifier) => address_ref.qualifier == *qualifier,
            AddressRefFilter::Address(address) => address_ref.address.eq_ignore_ascii_case(address.trim()),
        }
    }
}

pub trait AddressStore: Send + Sync {
    fn get(&self, key: &AddressRefKey) -> Result<AddressRef, DatastoreError>;

    fn fetch(&self) -> Result<Vec<AddressRef>, DatastoreError>;

    fn filter(&self, filters: &[AddressRefFilter]) -> Result<Vec<AddressRef>, DatastoreError> {
        Ok(self
            .fetch()?
            .into_iter()
            .filter(|address_ref| filters.iter().all(|filter| filter.matches(address_ref)))
            .collect())
    }
}

/// In-memory catalog, ordered by key so lookups are deterministic.
#[derive(Debug, Default)]
pub struct MemoryAddressStore {
    refs: RwLock<BTreeMap<AddressRefKey, AddressRef>>,
}

impl MemoryAddressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_refs<I: IntoIterator<Item = AddressRef>>(refs: I) -> Result<Self, DatastoreError> {
        let store = MemoryAddressStore::new();
        for address_ref in refs {
            store.add(address_ref)?;
        }
        Ok(store)
    }

    pub fn add(&self, address_ref: AddressRef) -> Result<(), DatastoreError> {
        let mut refs = self.refs.write().map_err(|e| DatastoreError::Unavailable(e.to_string()))?;
        let key = address_ref.key();
        if refs.contains_key(&key) {
            return Err(DatastoreError::Duplicate(key));
        }
        refs.insert(key, address_ref);
        Ok(())
    }

    pub fn upsert(&self, address_ref: AddressRef) -> Result<(), DatastoreError> {
        let mut refs = self.refs.write().map_err(|e| DatastoreError::Unavailable(e.to_string()))?;
        refs.insert(address_ref.key(), address_ref);
        Ok(())
    }
}

impl AddressStore for MemoryAddressStore {
    fn get(&self, key: &AddressRefKey) -> Result<AddressRef, DatastoreError> {
        let refs = self.refs.read().map_err(|e| DatastoreError::Unavailable(e.to_string()))?;
        refs.get(key).cloned().ok_or_else(|| DatastoreError::NotFound(key.clone()))
    }

    fn fetch(&self) -> Result<Vec<AddressRef>, DatastoreError> {
        let refs = self.refs.read().map_err(|e| DatastoreError::Unavailable(e.to_string()))?;
        Ok(refs.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timelock(qualifier: &str) -> AddressRef {
        let address = "0xAbC0000000000000000000000000000000000001";
        AddressRef::new(ChainSelector(1), RBAC_TIMELOCK, "1.0.0", qualifier, address)
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let store = MemoryAddressStore::new();
        store.add(timelock("")).unwrap();
        let err = store.add(timelock("")).unwrap_err();
        assert!(matches!(err, DatastoreError::Duplicate(_)));
        store.upsert(timelock("")).unwrap();
        assert_eq!(store.fetch().unwrap().len(), 1);
    }

    #[test]
    fn get_reports_missing_key() {
        let store = MemoryAddressStore::new();
        let key = timelock("main").key();
        assert_eq!(store.get(&key).unwrap_err().to_string(), "address ref 1:RBACTimelock@1.0.0[main] not found");
    }

    #[test]
    fn filters_combine_and_address_ignores_case() {
        let store = MemoryAddressStore::from_refs([
            timelock(""),
            timelock("main"),
            AddressRef::new(ChainSelector(1), CALL_PROXY, "1.0.0", "", "0x02"),
        ])
        .unwrap();
        let found = store
            .filter(&[
                AddressRefFilter::ContractType(RBAC_TIMELOCK.to_string()),
                AddressRefFilter::Address("0xabc0000000000000000000000000000000000001".to_string()),
                AddressRefFilter::Qualifier("main".to_string()),
            ])
            .unwrap();
        assert_eq!(found, vec![timelock("main")]);
    }
}
