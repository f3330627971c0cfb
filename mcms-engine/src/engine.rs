use crate::chain::family::ChainDirectory;
use crate::chain::interface::{BlockChain, BlockChains, Environment, TransactionResult};
use crate::config::EngineConfig;
use crate::context::ExecContext;
use crate::datastore::{AddressStore, MemoryAddressStore};
use crate::error::EngineError;
use crate::proposal::ChainSelector;
use crate::registry::FactoryRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Entry point for converting, signing, executing and inspecting proposals.
///
/// Holds no per-proposal state; one engine can serve any number of proposals.
#[derive(Clone)]
pub struct Engine {
    environment: Arc<dyn Environment>,
    address_store: Arc<dyn AddressStore>,
    registry: FactoryRegistry,
    directory: ChainDirectory,
    config: EngineConfig,
}

impl Default for Engine {
    /// No chains and an empty address store: enough for conversion and signing.
    fn default() -> Self {
        Engine::new(Arc::new(BlockChains::new()), Arc::new(MemoryAddressStore::new()))
    }
}

impl Engine {
    pub fn new(environment: Arc<dyn Environment>, address_store: Arc<dyn AddressStore>) -> Self {
        Engine {
            environment,
            address_store,
            registry: FactoryRegistry::default(),
            directory: ChainDirectory::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: FactoryRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_directory(mut self, directory: ChainDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &ChainDirectory {
        &self.directory
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn address_store(&self) -> &dyn AddressStore {
        self.address_store.as_ref()
    }

    /// Looks up every selector before anything is sent, so a missing chain
    /// fails the whole operation up front.
    pub(crate) fn resolve_blockchains<I>(
        &self,
        selectors: I,
    ) -> Result<BTreeMap<ChainSelector, BlockChain>, EngineError>
    where
        I: IntoIterator<Item = ChainSelector>,
    {
        selectors
            .into_iter()
            .map(|selector| Ok((selector, self.environment.get_by_selector(selector)?)))
            .collect()
    }

    pub(crate) async fn confirm(
        &self,
        ctx: &ExecContext,
        chain: &BlockChain,
        result: &TransactionResult,
    ) -> Result<(), EngineError> {
        chain.confirm_with(ctx, result, self.config.receipt_poll_interval).await
    }
}
