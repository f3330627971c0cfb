// mcms-engine/tests/common/mod.rs
// Shared setup for the integration tests

use mcms_engine::test_utils::{evm_chain, test_engine, MockEvmClient, TEST_SELECTOR};
use mcms_engine::datastore::MemoryAddressStore;
use mcms_engine::Engine;
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine over a single mocked EVM chain at `TEST_SELECTOR`.
#[allow(dead_code)]
pub fn evm_engine(client: Arc<MockEvmClient>, store: MemoryAddressStore) -> Engine {
    init_logging();
    test_engine(vec![evm_chain(TEST_SELECTOR, client)], store)
}
