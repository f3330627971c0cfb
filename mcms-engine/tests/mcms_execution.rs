// mcms-engine/tests/mcms_execution.rs
// Plain MCMS proposals against a mocked EVM chain: ordering, confirmation, up-front failures

mod common;

use common::{evm_engine, init_logging};
use ethers::signers::Signer;
use mcms_engine::datastore::MemoryAddressStore;
use mcms_engine::executor::Executable;
use mcms_engine::signer::proposal_signing_hash;
use mcms_engine::test_utils::{
    evm_chain, mcms_proposal, test_engine, test_wallet, MockEvmClient, MCM_ADDRESS, TEST_SELECTOR,
};
use mcms_engine::{ChainMetadata, ChainSelector, EngineError, ExecContext, Operation};
use std::collections::BTreeMap;

const SEPOLIA: ChainSelector = ChainSelector(16015286601757825753);

#[tokio::test]
async fn test_set_root_is_confirmed_before_operations_execute() {
    let client = MockEvmClient::new();
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());
    let ctx = ExecContext::new();

    let mut proposal = mcms_proposal(TEST_SELECTOR, 2);
    engine.sign_mcms(&ctx, &mut proposal, &test_wallet(1)).await.unwrap();
    engine.sign_mcms(&ctx, &mut proposal, &test_wallet(2)).await.unwrap();

    engine.execute_mcms(&ctx, &proposal).await.unwrap();

    assert_eq!(client.sent_methods(), vec!["setRoot", "execute", "execute"]);
    assert_eq!(
        client.timeline(),
        vec!["setRoot", "receipt", "execute", "receipt", "execute", "receipt"]
    );
    assert_eq!(client.confirmed_methods(), vec!["setRoot", "execute", "execute"]);

    let mcm = MCM_ADDRESS.parse().unwrap();
    assert!(client.sent_to().iter().all(|(to, _)| *to == mcm));
}

#[tokio::test]
async fn test_invalid_proposal_makes_no_chain_calls() {
    let client = MockEvmClient::new();
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());

    let mut proposal = mcms_proposal(TEST_SELECTOR, 1);
    proposal.operations.clear();

    let err = engine.execute_mcms(&ExecContext::new(), &proposal).await.unwrap_err();
    assert!(err.is_validation());
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_operation_without_chain_metadata_makes_no_chain_calls() {
    let client = MockEvmClient::new();
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());

    let mut proposal = mcms_proposal(TEST_SELECTOR, 2);
    proposal.operations[0].chain_selector = ChainSelector(999);

    let err = engine.execute_mcms(&ExecContext::new(), &proposal).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(
        err.to_string(),
        "proposal validation failed: missing chain metadata for chain selector 999"
    );
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_missing_blockchain_fails_before_any_send() {
    let client = MockEvmClient::new();
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());

    // Second chain is known to the directory but not to the environment
    let mut proposal = mcms_proposal(TEST_SELECTOR, 1);
    proposal.chain_metadata.insert(SEPOLIA, ChainMetadata::new(0, MCM_ADDRESS));
    proposal.operations.push(Operation {
        chain_selector: SEPOLIA,
        transaction: proposal.operations[0].transaction.clone(),
    });

    let err = engine.execute_mcms(&ExecContext::new(), &proposal).await.unwrap_err();
    assert!(matches!(err, EngineError::BlockchainNotFound(selector) if selector == SEPOLIA));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_failed_set_root_stops_execution() {
    let client = MockEvmClient::new();
    client.fail_method("setRoot");
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());

    let err = engine.execute_mcms(&ExecContext::new(), &mcms_proposal(TEST_SELECTOR, 2)).await.unwrap_err();
    assert!(matches!(err, EngineError::SetRoot { selector, .. } if selector == TEST_SELECTOR));
    assert!(client.sent_methods().is_empty());
}

#[tokio::test]
async fn test_reverted_receipt_aborts_before_next_send() {
    let client = MockEvmClient::new();
    client.revert_receipts();
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());

    let err = engine.execute_mcms(&ExecContext::new(), &mcms_proposal(TEST_SELECTOR, 2)).await.unwrap_err();
    assert!(matches!(err, EngineError::Confirm { .. }), "unexpected error: {}", err);
    assert_eq!(client.sent_methods(), vec!["setRoot"]);
}

#[tokio::test]
async fn test_failed_operation_names_its_index() {
    let client = MockEvmClient::new();
    client.fail_method("execute");
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());

    let err = engine.execute_mcms(&ExecContext::new(), &mcms_proposal(TEST_SELECTOR, 3)).await.unwrap_err();
    assert!(matches!(err, EngineError::Execute { index: 0, .. }));
    // Root stays set; nothing is rolled back
    assert_eq!(client.confirmed_methods(), vec!["setRoot"]);
}

#[tokio::test]
async fn test_cancelled_context_sends_nothing() {
    let client = MockEvmClient::new();
    let engine = evm_engine(client.clone(), MemoryAddressStore::new());
    let ctx = ExecContext::new();
    ctx.cancel();

    let err = engine.execute_mcms(&ctx, &mcms_proposal(TEST_SELECTOR, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(client.sent_methods().is_empty());
}

#[tokio::test]
async fn test_op_counts_read_every_chain() {
    init_logging();
    let local = MockEvmClient::new();
    local.set_op_count(7);
    let sepolia = MockEvmClient::new();
    sepolia.set_op_count(3);
    let engine = test_engine(
        vec![evm_chain(TEST_SELECTOR, local.clone()), evm_chain(SEPOLIA, sepolia.clone())],
        MemoryAddressStore::new(),
    );

    let mut proposal = mcms_proposal(TEST_SELECTOR, 1);
    proposal.chain_metadata.insert(SEPOLIA, ChainMetadata::new(3, MCM_ADDRESS));

    let counts = engine.op_counts(&ExecContext::new(), &proposal).await.unwrap();
    assert_eq!(counts, BTreeMap::from([(TEST_SELECTOR, 7), (SEPOLIA, 3)]));
    assert!(local.sent_methods().is_empty());
}

#[tokio::test]
async fn test_executable_sorts_signatures_by_signer() {
    init_logging();
    let engine = test_engine(Vec::new(), MemoryAddressStore::new());
    let ctx = ExecContext::new();
    let mut proposal = mcms_proposal(TEST_SELECTOR, 1);
    for seed in [5u8, 1, 9, 3] {
        engine.sign_mcms(&ctx, &mut proposal, &test_wallet(seed)).await.unwrap();
    }

    let encoders = proposal.encoders(engine.directory()).unwrap();
    let executable = Executable::new(&proposal, &encoders, BTreeMap::new()).unwrap();
    let hash = proposal_signing_hash(&proposal, engine.directory(), None).unwrap();

    let signers: Vec<_> = executable.signatures().iter().map(|s| s.recover(hash).unwrap()).collect();
    let mut sorted = signers.clone();
    sorted.sort();
    assert_eq!(signers, sorted);
    assert_eq!(signers.len(), 4);
    assert!(signers.contains(&test_wallet(9).address()));
}
