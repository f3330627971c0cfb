use crate::chain::family::{ChainDirectory, ChainFamily};
use crate::context::ExecContext;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::proposal::{Proposal, ProposalTree, Signature, TimelockAction, TimelockProposal};
use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;
use log::info;

/// Hash a signer must sign to authorize `proposal` (EIP-191 over root and validUntil).
///
/// Aptos leaves commit to a role that only a timelock action supplies, so a
/// plain proposal touching an Aptos chain has no signing hash.
pub fn proposal_signing_hash(
    proposal: &Proposal,
    directory: &ChainDirectory,
    action: Option<TimelockAction>,
) -> Result<H256, EngineError> {
    let encoders = proposal.encoders_for(directory, action)?;
    if action.is_none() && encoders.values().any(|encoder| encoder.family() == ChainFamily::Aptos) {
        return Err(EngineError::UnsupportedRole { family: ChainFamily::Aptos, role: "signing" });
    }
    Ok(ProposalTree::build(proposal, &encoders)?.signing_hash(proposal.valid_until))
}

pub fn sign_hash(wallet: &LocalWallet, hash: H256) -> Result<Signature, EngineError> {
    wallet.sign_hash(hash).map(Signature::from).map_err(|e| EngineError::Signing(e.to_string()))
}

fn check_not_expired(valid_until: u32) -> Result<(), EngineError> {
    if i64::from(valid_until) <= Utc::now().timestamp() {
        return Err(EngineError::Expired { valid_until });
    }
    Ok(())
}

impl Engine {
    /// Signs the proposal's merkle root and appends the signature.
    pub async fn sign_mcms(
        &self,
        ctx: &ExecContext,
        proposal: &mut Proposal,
        wallet: &LocalWallet,
    ) -> Result<Signature, EngineError> {
        ctx.check()?;
        proposal.validate()?;
        check_not_expired(proposal.valid_until)?;

        let hash = proposal_signing_hash(proposal, self.directory(), None)?;
        let signature = sign_hash(wallet, hash)?;
        proposal.signatures.push(signature);
        info!(
            "[Signer] Proposal {}: signed by {:?} ({} signatures)",
            proposal.id(),
            wallet.address(),
            proposal.signatures.len()
        );
        Ok(signature)
    }

    /// Signs the converted proposal's root; the signature is appended to the
    /// timelock proposal itself.
    pub async fn sign_timelock(
        &self,
        ctx: &ExecContext,
        proposal: &mut TimelockProposal,
        wallet: &LocalWallet,
    ) -> Result<Signature, EngineError> {
        ctx.check()?;
        proposal.validate()?;
        check_not_expired(proposal.valid_until)?;

        let converted = self.convert_timelock(ctx, proposal).await?;
        let hash = proposal_signing_hash(&converted.proposal, self.directory(), Some(proposal.action))?;
        let signature = sign_hash(wallet, hash)?;
        proposal.signatures.push(signature);
        info!(
            "[Signer] Timelock proposal {} ({}): signed by {:?} ({} signatures)",
            proposal.id(),
            proposal.action,
            wallet.address(),
            proposal.signatures.len()
        );
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mcms_proposal, test_wallet, TEST_SELECTOR};

    #[tokio::test]
    async fn signature_recovers_to_the_wallet() {
        let engine = Engine::default();
        let mut proposal = mcms_proposal(TEST_SELECTOR, 2);
        let wallet = test_wallet(1);
        let signature = engine.sign_mcms(&ExecContext::new(), &mut proposal, &wallet).await.unwrap();
        let hash = proposal_signing_hash(&proposal, engine.directory(), None).unwrap();
        assert_eq!(signature.recover(hash).unwrap(), wallet.address());
    }

    #[tokio::test]
    async fn expired_proposal_is_not_signed() {
        let engine = Engine::default();
        let mut proposal = mcms_proposal(TEST_SELECTOR, 1);
        proposal.valid_until = 1;
        let err = engine.sign_mcms(&ExecContext::new(), &mut proposal, &test_wallet(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Expired { valid_until: 1 }));
        assert!(proposal.signatures.is_empty());
    }

    #[tokio::test]
    async fn plain_aptos_proposal_is_not_signed() {
        use crate::proposal::{ChainMetadata, Operation};
        use crate::test_utils::{aptos_call, APTOS_MCMS, APTOS_SELECTOR, VALID_UNTIL};
        use std::collections::BTreeMap;

        let engine = Engine::default();
        let mut proposal = Proposal::new(
            "v1",
            VALID_UNTIL,
            BTreeMap::from([(APTOS_SELECTOR, ChainMetadata::new(0, APTOS_MCMS))]),
            vec![Operation { chain_selector: APTOS_SELECTOR, transaction: aptos_call(1) }],
        );

        let err = engine.sign_mcms(&ExecContext::new(), &mut proposal, &test_wallet(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedRole { family: ChainFamily::Aptos, role: "signing" }));
        assert_eq!(err.to_string(), "aptos does not support signing on non-timelock proposals");
        assert!(proposal.signatures.is_empty());

        // The same chain signs fine once a timelock action picks the role
        assert!(proposal_signing_hash(&proposal, engine.directory(), Some(TimelockAction::Cancel)).is_ok());
    }

    #[tokio::test]
    async fn signing_hash_ignores_existing_signatures() {
        let engine = Engine::default();
        let mut proposal = mcms_proposal(TEST_SELECTOR, 1);
        let before = proposal_signing_hash(&proposal, engine.directory(), None).unwrap();
        engine.sign_mcms(&ExecContext::new(), &mut proposal, &test_wallet(2)).await.unwrap();
        assert_eq!(proposal_signing_hash(&proposal, engine.directory(), None).unwrap(), before);
    }
}
