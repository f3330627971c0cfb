// Per-family factories for the four chain capabilities

use crate::chain::aptos::{
    AptosExecutorFactory, AptosInspectorFactory, AptosTimelockConverterFactory, AptosTimelockExecutorFactory,
};
use crate::chain::encoder::Encoder;
use crate::chain::evm::{
    EvmExecutorFactory, EvmInspectorFactory, EvmTimelockConverterFactory, EvmTimelockExecutorFactory,
};
use crate::chain::family::ChainFamily;
use crate::chain::interface::{BlockChain, Executor, Inspector, TimelockConverter, TimelockExecutor};
use crate::chain::solana::{
    SolanaExecutorFactory, SolanaInspectorFactory, SolanaTimelockConverterFactory, SolanaTimelockExecutorFactory,
};
use crate::error::EngineError;
use crate::proposal::TimelockAction;
use std::collections::HashMap;
use std::sync::Arc;

/// `action` is `Some` when the proposal being inspected came from a timelock proposal.
pub trait InspectorFactory: Send + Sync {
    fn make(&self, chain: &BlockChain, action: Option<TimelockAction>) -> Result<Arc<dyn Inspector>, EngineError>;
}

pub trait TimelockConverterFactory: Send + Sync {
    fn make(&self) -> Result<Arc<dyn TimelockConverter>, EngineError>;
}

/// Fails with `EncoderNotFound` when `encoder` belongs to another family.
pub trait ExecutorFactory: Send + Sync {
    fn make(
        &self,
        chain: &BlockChain,
        encoder: &Encoder,
        action: Option<TimelockAction>,
    ) -> Result<Arc<dyn Executor>, EngineError>;
}

pub trait TimelockExecutorFactory: Send + Sync {
    fn make(&self, chain: &BlockChain) -> Result<Arc<dyn TimelockExecutor>, EngineError>;

    /// Whether timelock execution on this family goes out through a CallProxy.
    fn requires_call_proxy(&self) -> bool {
        false
    }
}

/// Four registries keyed by family. Adding a family means registering its four
/// factories; nothing downstream matches on the family.
#[derive(Clone)]
pub struct FactoryRegistry {
    inspectors: HashMap<ChainFamily, Arc<dyn InspectorFactory>>,
    converters: HashMap<ChainFamily, Arc<dyn TimelockConverterFactory>>,
    executors: HashMap<ChainFamily, Arc<dyn ExecutorFactory>>,
    timelock_executors: HashMap<ChainFamily, Arc<dyn TimelockExecutorFactory>>,
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        let mut registry = FactoryRegistry::empty();
        registry
            .register_inspector(ChainFamily::Evm, Arc::new(EvmInspectorFactory))
            .register_converter(ChainFamily::Evm, Arc::new(EvmTimelockConverterFactory))
            .register_executor(ChainFamily::Evm, Arc::new(EvmExecutorFactory))
            .register_timelock_executor(ChainFamily::Evm, Arc::new(EvmTimelockExecutorFactory));
        registry
            .register_inspector(ChainFamily::Solana, Arc::new(SolanaInspectorFactory))
            .register_converter(ChainFamily::Solana, Arc::new(SolanaTimelockConverterFactory))
            .register_executor(ChainFamily::Solana, Arc::new(SolanaExecutorFactory))
            .register_timelock_executor(ChainFamily::Solana, Arc::new(SolanaTimelockExecutorFactory));
        registry
            .register_inspector(ChainFamily::Aptos, Arc::new(AptosInspectorFactory))
            .register_converter(ChainFamily::Aptos, Arc::new(AptosTimelockConverterFactory))
            .register_executor(ChainFamily::Aptos, Arc::new(AptosExecutorFactory))
            .register_timelock_executor(ChainFamily::Aptos, Arc::new(AptosTimelockExecutorFactory));
        registry
    }
}

impl FactoryRegistry {
    pub fn empty() -> Self {
        FactoryRegistry {
            inspectors: HashMap::new(),
            converters: HashMap::new(),
            executors: HashMap::new(),
            timelock_executors: HashMap::new(),
        }
    }

    pub fn register_inspector(&mut self, family: ChainFamily, factory: Arc<dyn InspectorFactory>) -> &mut Self {
        self.inspectors.insert(family, factory);
        self
    }

    pub fn register_converter(&mut self, family: ChainFamily, factory: Arc<dyn TimelockConverterFactory>) -> &mut Self {
        self.converters.insert(family, factory);
        self
    }

    pub fn register_executor(&mut self, family: ChainFamily, factory: Arc<dyn ExecutorFactory>) -> &mut Self {
        self.executors.insert(family, factory);
        self
    }

    pub fn register_timelock_executor(
        &mut self,
        family: ChainFamily,
        factory: Arc<dyn TimelockExecutorFactory>,
    ) -> &mut Self {
        self.timelock_executors.insert(family, factory);
        self
    }

    pub fn inspector_factory(&self, family: ChainFamily) -> Result<&Arc<dyn InspectorFactory>, EngineError> {
        self.inspectors.get(&family).ok_or_else(|| EngineError::UnsupportedFamily(family.to_string()))
    }

    pub fn converter_factory(&self, family: ChainFamily) -> Result<&Arc<dyn TimelockConverterFactory>, EngineError> {
        self.converters.get(&family).ok_or_else(|| EngineError::UnsupportedFamily(family.to_string()))
    }

    pub fn executor_factory(&self, family: ChainFamily) -> Result<&Arc<dyn ExecutorFactory>, EngineError> {
        self.executors.get(&family).ok_or_else(|| EngineError::UnsupportedFamily(family.to_string()))
    }

    pub fn timelock_executor_factory(
        &self,
        family: ChainFamily,
    ) -> Result<&Arc<dyn TimelockExecutorFactory>, EngineError> {
        self.timelock_executors.get(&family).ok_or_else(|| EngineError::UnsupportedFamily(family.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_family() {
        let registry = FactoryRegistry::default();
        for family in ChainFamily::ALL {
            assert!(registry.inspector_factory(family).is_ok());
            assert!(registry.converter_factory(family).is_ok());
            assert!(registry.executor_factory(family).is_ok());
            assert!(registry.timelock_executor_factory(family).is_ok());
        }
    }

    #[test]
    fn only_evm_requires_call_proxy() {
        let registry = FactoryRegistry::default();
        let requires = |family| registry.timelock_executor_factory(family).unwrap().requires_call_proxy();
        assert!(requires(ChainFamily::Evm));
        assert!(!requires(ChainFamily::Solana));
        assert!(!requires(ChainFamily::Aptos));
    }

    #[test]
    fn executor_factory_rejects_encoder_of_another_family() {
        use crate::chain::solana::SolanaEncoder;
        use crate::test_utils::{evm_chain, MockEvmClient, SOLANA_SELECTOR, TEST_SELECTOR};

        let registry = FactoryRegistry::default();
        let chain = evm_chain(TEST_SELECTOR, MockEvmClient::new());
        let encoder = Encoder::Solana(SolanaEncoder::new(SOLANA_SELECTOR, 0, 1, false));

        let err = registry.executor_factory(ChainFamily::Evm).unwrap().make(&chain, &encoder, None).err().unwrap();
        assert_eq!(err.to_string(), "encoder not found for chain selector 16423721717087811551");
    }

    #[test]
    fn empty_registry_reports_unsupported_family() {
        let registry = FactoryRegistry::empty();
        let err = registry.executor_factory(ChainFamily::Solana).err().unwrap();
        assert_eq!(err.to_string(), "chain family not supported: solana");
    }
}
