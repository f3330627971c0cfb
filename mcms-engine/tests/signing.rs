// mcms-engine/tests/signing.rs
// Offline signing and the JSON document format

mod common;

use common::init_logging;
use ethers::signers::Signer;
use ethers::types::H256;
use mcms_engine::signer::proposal_signing_hash;
use mcms_engine::test_utils::{mcms_proposal, test_wallet, timelock_proposal, TEST_SELECTOR};
use mcms_engine::{Engine, EngineError, ExecContext, Proposal, TimelockAction, TimelockProposal, ValidationError};
use std::time::Duration;

#[tokio::test]
async fn test_each_signer_appends_one_signature() {
    init_logging();
    let engine = Engine::default();
    let ctx = ExecContext::new();
    let mut proposal = mcms_proposal(TEST_SELECTOR, 3);

    let first = engine.sign_mcms(&ctx, &mut proposal, &test_wallet(1)).await.unwrap();
    assert_eq!(proposal.signatures.len(), 1);
    let second = engine.sign_mcms(&ctx, &mut proposal, &test_wallet(2)).await.unwrap();
    assert_eq!(proposal.signatures, vec![first, second]);

    assert_ne!(first.r, second.r);
    assert_ne!(first.s, second.s);

    let hash = proposal_signing_hash(&proposal, engine.directory(), None).unwrap();
    assert_eq!(first.recover(hash).unwrap(), test_wallet(1).address());
    assert_eq!(second.recover(hash).unwrap(), test_wallet(2).address());
}

#[tokio::test]
async fn test_timelock_signature_covers_converted_proposal() {
    init_logging();
    let engine = Engine::default();
    let ctx = ExecContext::new();
    let mut proposal = timelock_proposal(TEST_SELECTOR, TimelockAction::Schedule, 2);
    proposal.delay = Duration::from_secs(3600);

    let signature = engine.sign_timelock(&ctx, &mut proposal, &test_wallet(4)).await.unwrap();
    assert_eq!(proposal.signatures, vec![signature]);

    let converted = engine.convert_timelock(&ctx, &proposal).await.unwrap();
    // Signatures travel with the converted proposal
    assert_eq!(converted.proposal.signatures, vec![signature]);
    let hash = proposal_signing_hash(&converted.proposal, engine.directory(), Some(TimelockAction::Schedule)).unwrap();
    assert_eq!(signature.recover(hash).unwrap(), test_wallet(4).address());
}

#[tokio::test]
async fn test_timelock_actions_sign_different_roots() {
    let engine = Engine::default();
    let ctx = ExecContext::new();
    let mut hashes = Vec::new();
    for action in [TimelockAction::Schedule, TimelockAction::Cancel, TimelockAction::Bypass] {
        let proposal = timelock_proposal(TEST_SELECTOR, action, 1);
        let converted = engine.convert_timelock(&ctx, &proposal).await.unwrap();
        hashes.push(proposal_signing_hash(&converted.proposal, engine.directory(), Some(action)).unwrap());
    }
    assert_ne!(hashes[0], hashes[1]);
    assert_ne!(hashes[1], hashes[2]);
    assert_ne!(hashes[0], hashes[2]);
}

#[tokio::test]
async fn test_unknown_selector_is_not_signed() {
    let engine = Engine::default();
    let mut proposal = mcms_proposal(mcms_engine::ChainSelector(1), 1);
    let err = engine.sign_mcms(&ExecContext::new(), &mut proposal, &test_wallet(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownChainSelector(_)), "unexpected error: {}", err);
    assert!(proposal.signatures.is_empty());
}

#[tokio::test]
async fn test_signed_proposal_round_trips_byte_for_byte() {
    let engine = Engine::default();
    let mut proposal = mcms_proposal(TEST_SELECTOR, 2);
    engine.sign_mcms(&ExecContext::new(), &mut proposal, &test_wallet(3)).await.unwrap();

    let json = proposal.to_json().unwrap();
    let decoded = Proposal::from_json(&json).unwrap();
    assert_eq!(decoded, proposal);
    assert_eq!(decoded.to_json().unwrap(), json);

    let mut written = Vec::new();
    decoded.write_to(&mut written).unwrap();
    assert_eq!(Proposal::read_from(written.as_slice()).unwrap(), proposal);
}

#[test]
fn test_timelock_proposal_round_trips_byte_for_byte() {
    let mut proposal = timelock_proposal(TEST_SELECTOR, TimelockAction::Cancel, 2);
    proposal.delay = Duration::from_secs(90);
    proposal.salt_override = Some(H256::repeat_byte(0x42));

    let json = proposal.to_json().unwrap();
    assert!(json.contains("\"delay\": \"1m 30s\""));
    let decoded = TimelockProposal::from_json(&json).unwrap();
    assert_eq!(decoded, proposal);
    assert_eq!(decoded.to_json().unwrap(), json);
}

#[test]
fn test_documents_of_the_other_kind_are_rejected() {
    let json = timelock_proposal(TEST_SELECTOR, TimelockAction::Schedule, 1).to_json().unwrap();
    let err = Proposal::from_json(&json).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::UnexpectedKind { .. })));
}

#[tokio::test]
async fn test_id_is_stable_across_signing() {
    let engine = Engine::default();
    let mut proposal = mcms_proposal(TEST_SELECTOR, 1);
    let before = proposal.id();
    engine.sign_mcms(&ExecContext::new(), &mut proposal, &test_wallet(1)).await.unwrap();
    assert_eq!(proposal.id(), before);
    assert_eq!(before.len(), 16);
}
