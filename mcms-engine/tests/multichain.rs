// mcms-engine/tests/multichain.rs
// Solana and Aptos flows, and a proposal spanning all three families

mod common;

use common::init_logging;
use mcms_engine::chain::family::ChainFamily;
use mcms_engine::datastore::MemoryAddressStore;
use mcms_engine::test_utils::{
    aptos_call, aptos_chain, aptos_timelock_proposal, call_proxy_store, evm_chain, solana_chain,
    solana_timelock_proposal, test_engine, test_wallet, timelock_proposal, MockAptosClient, MockEvmClient,
    MockSolanaClient, APTOS_MCMS, APTOS_SELECTOR, SOLANA_SELECTOR, TEST_SELECTOR,
};
use mcms_engine::{
    BatchOperation, ChainMetadata, EngineError, ExecContext, Operation, Proposal, TimelockAction,
};
use std::collections::BTreeMap;

#[tokio::test]
async fn test_solana_schedule_needs_no_confirmation_round_trip() {
    init_logging();
    let client = MockSolanaClient::new();
    let engine = test_engine(vec![solana_chain(SOLANA_SELECTOR, client.clone())], MemoryAddressStore::new());

    let proposal = solana_timelock_proposal(TimelockAction::Schedule);
    engine.execute_timelock(&ExecContext::new(), &proposal).await.unwrap();

    assert_eq!(client.sent_methods(), vec!["set_root", "execute", "execute_batch"]);
    // Readiness is the only view; confirmation happens inside send_and_confirm
    assert_eq!(client.views(), vec!["is_operation_ready"]);
    assert!(client.sent().iter().all(|signed| signed.verify().is_ok()));
}

#[tokio::test]
async fn test_solana_cancel_skips_timelock_phase() {
    init_logging();
    let client = MockSolanaClient::new();
    client.set_not_ready();
    let engine = test_engine(vec![solana_chain(SOLANA_SELECTOR, client.clone())], MemoryAddressStore::new());

    let proposal = solana_timelock_proposal(TimelockAction::Cancel);
    engine.execute_timelock(&ExecContext::new(), &proposal).await.unwrap();

    assert_eq!(client.sent_methods(), vec!["set_root", "execute"]);
    assert!(client.views().is_empty());
}

#[tokio::test]
async fn test_aptos_timelock_waits_for_every_transaction() {
    init_logging();
    let client = MockAptosClient::new();
    let engine = test_engine(vec![aptos_chain(APTOS_SELECTOR, client.clone())], MemoryAddressStore::new());

    let proposal = aptos_timelock_proposal(TimelockAction::Schedule);
    engine.execute_timelock(&ExecContext::new(), &proposal).await.unwrap();

    assert_eq!(client.submitted_functions(), vec!["set_root", "execute", "timelock_execute_batch"]);
    let hashes: Vec<String> = (1..=3).map(|n| format!("0x{:064x}", n)).collect();
    assert_eq!(client.waited(), hashes);
}

#[tokio::test]
async fn test_aptos_plain_proposal_has_no_role() {
    init_logging();
    let client = MockAptosClient::new();
    let engine = test_engine(vec![aptos_chain(APTOS_SELECTOR, client.clone())], MemoryAddressStore::new());

    let proposal = Proposal::new(
        "v1",
        4_000_000_000,
        BTreeMap::from([(APTOS_SELECTOR, ChainMetadata::new(0, APTOS_MCMS))]),
        vec![Operation { chain_selector: APTOS_SELECTOR, transaction: aptos_call(1) }],
    );

    let err = engine.execute_mcms(&ExecContext::new(), &proposal).await.unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedRole { family: ChainFamily::Aptos, role: "execution" }));
    let err = engine.op_counts(&ExecContext::new(), &proposal).await.unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedRole { family: ChainFamily::Aptos, role: "inspection" }));
    let mut unsigned = proposal.clone();
    let err = engine.sign_mcms(&ExecContext::new(), &mut unsigned, &test_wallet(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedRole { family: ChainFamily::Aptos, role: "signing" }));
    assert!(unsigned.signatures.is_empty());
    assert!(client.submitted().is_empty());
    assert!(client.views().is_empty());
}

#[tokio::test]
async fn test_aptos_timelock_op_count_uses_the_action_role() {
    init_logging();
    let client = MockAptosClient::new();
    client.set_op_count(4);
    let engine = test_engine(vec![aptos_chain(APTOS_SELECTOR, client.clone())], MemoryAddressStore::new());

    let proposal = aptos_timelock_proposal(TimelockAction::Bypass);
    let counts = engine.timelock_op_counts(&ExecContext::new(), &proposal).await.unwrap();
    assert_eq!(counts.get(&APTOS_SELECTOR), Some(&4));
    assert_eq!(client.views(), vec!["get_op_count"]);
}

#[tokio::test]
async fn test_schedule_across_three_families() {
    init_logging();
    let evm = MockEvmClient::new();
    let solana = MockSolanaClient::new();
    let aptos = MockAptosClient::new();
    let engine = test_engine(
        vec![
            evm_chain(TEST_SELECTOR, evm.clone()),
            solana_chain(SOLANA_SELECTOR, solana.clone()),
            aptos_chain(APTOS_SELECTOR, aptos.clone()),
        ],
        call_proxy_store(TEST_SELECTOR),
    );

    // Merge the single-family fixtures into one proposal
    let mut proposal = timelock_proposal(TEST_SELECTOR, TimelockAction::Schedule, 1);
    for other in [
        solana_timelock_proposal(TimelockAction::Schedule),
        aptos_timelock_proposal(TimelockAction::Schedule),
    ] {
        proposal.chain_metadata.extend(other.chain_metadata);
        proposal.timelock_addresses.extend(other.timelock_addresses);
        proposal.operations.extend(other.operations);
    }
    proposal.operations.push(BatchOperation { chain_selector: APTOS_SELECTOR, transactions: vec![aptos_call(2)] });

    engine.execute_timelock(&ExecContext::new(), &proposal).await.unwrap();

    assert_eq!(evm.confirmed_methods(), vec!["setRoot", "execute", "executeBatch"]);
    assert_eq!(solana.sent_methods(), vec!["set_root", "execute", "execute_batch"]);
    assert_eq!(
        aptos.submitted_functions(),
        vec!["set_root", "execute", "execute", "timelock_execute_batch", "timelock_execute_batch"]
    );
    assert_eq!(aptos.waited().len(), 5);
}
