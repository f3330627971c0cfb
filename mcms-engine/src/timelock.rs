// Two-phase timelock execution: MCMS authorization, then the timelock batch

use crate::chain::interface::{TimelockCall, TimelockExecuteOptions, TimelockExecutor, TransactionResult};
use crate::context::ExecContext;
use crate::converter::ConvertedProposal;
use crate::datastore::{AddressRefFilter, AddressStore, CALL_PROXY, RBAC_TIMELOCK};
use crate::engine::Engine;
use crate::error::{EngineError, ValidationError};
use crate::proposal::{ChainSelector, TimelockAction, TimelockProposal};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Finds the CallProxy that fronts `timelock_address` on `selector`.
///
/// The RBACTimelock ref for that address decides the qualifier. A qualified
/// timelock needs the CallProxy with the same qualifier; an unqualified one
/// takes the only CallProxy on the chain and fails if there are several.
pub fn resolve_call_proxy(
    store: &dyn AddressStore,
    selector: ChainSelector,
    timelock_address: &str,
) -> Result<String, EngineError> {
    let timelocks = store.filter(&[
        AddressRefFilter::ChainSelector(selector),
        AddressRefFilter::ContractType(RBAC_TIMELOCK.to_string()),
        AddressRefFilter::Address(timelock_address.to_string()),
    ])?;
    let timelock = timelocks.first().ok_or_else(|| EngineError::TimelockAddressNotFound {
        selector,
        address: timelock_address.to_string(),
    })?;

    let mut filters = vec![
        AddressRefFilter::ChainSelector(selector),
        AddressRefFilter::ContractType(CALL_PROXY.to_string()),
    ];
    if !timelock.qualifier.is_empty() {
        filters.push(AddressRefFilter::Qualifier(timelock.qualifier.clone()));
    }
    let mut proxies = store.filter(&filters)?;
    match proxies.len() {
        0 => Err(EngineError::CallProxyNotFound { selector, qualifier: timelock.qualifier.clone() }),
        1 => Ok(proxies.remove(0).address),
        _ => Err(EngineError::AmbiguousCallProxy {
            selector,
            addresses: proxies.into_iter().map(|proxy| proxy.address).collect(),
        }),
    }
}

/// The scheduled batches of a timelock proposal, paired with the ids and
/// predecessors produced when it was converted.
pub struct TimelockExecutable<'a> {
    proposal: &'a TimelockProposal,
    converted: &'a ConvertedProposal,
    executors: BTreeMap<ChainSelector, Arc<dyn TimelockExecutor>>,
}

impl<'a> TimelockExecutable<'a> {
    pub fn new(
        proposal: &'a TimelockProposal,
        converted: &'a ConvertedProposal,
        executors: BTreeMap<ChainSelector, Arc<dyn TimelockExecutor>>,
    ) -> Result<Self, EngineError> {
        for batch in &proposal.operations {
            if !executors.contains_key(&batch.chain_selector) {
                return Err(EngineError::ExecutorNotFound(batch.chain_selector));
            }
        }
        if converted.operation_ids.len() != proposal.operations.len() {
            return Err(EngineError::OperationOutOfRange(converted.operation_ids.len()));
        }
        Ok(TimelockExecutable { proposal, converted, executors })
    }

    fn call(&self, index: usize) -> Result<(&Arc<dyn TimelockExecutor>, TimelockCall<'a>), EngineError> {
        let batch = self.proposal.operations.get(index).ok_or(EngineError::OperationOutOfRange(index))?;
        let selector = batch.chain_selector;
        let timelock_address = self
            .proposal
            .timelock_addresses
            .get(&selector)
            .ok_or(ValidationError::MissingTimelockAddress(selector))?;
        let executor = self.executors.get(&selector).ok_or(EngineError::ExecutorNotFound(selector))?;
        let call = TimelockCall {
            timelock_address,
            batch,
            operation_id: self.converted.operation_ids[index],
            predecessor: self.converted.predecessors[index],
            salt: self.converted.salt,
        };
        Ok((executor, call))
    }

    /// True once every batch is ready. "Not ready" answers are `Ok(false)`;
    /// any other chain failure is an error.
    pub async fn is_ready(&self, ctx: &ExecContext) -> Result<bool, EngineError> {
        for index in 0..self.proposal.operations.len() {
            let (executor, call) = self.call(index)?;
            let selector = call.batch.chain_selector;
            match ctx.run(async { Ok::<_, EngineError>(executor.is_ready(ctx, &call).await) }).await? {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) if e.is_not_ready() => return Ok(false),
                Err(source) => return Err(EngineError::Readiness { selector, index, source }),
            }
        }
        Ok(true)
    }

    /// Polls `is_ready` up to `attempts` times, sleeping `delay` between attempts.
    pub async fn wait_until_ready(&self, ctx: &ExecContext, attempts: u32, delay: Duration) -> Result<(), EngineError> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            if self.is_ready(ctx).await? {
                return Ok(());
            }
            debug!("[Timelock] Proposal {}: not ready (attempt {}/{})", self.proposal.id(), attempt, attempts);
            if attempt < attempts {
                ctx.sleep(delay).await?;
            }
        }
        Err(EngineError::NotReady { attempts })
    }

    pub async fn execute(
        &self,
        ctx: &ExecContext,
        index: usize,
        options: &TimelockExecuteOptions,
    ) -> Result<TransactionResult, EngineError> {
        let (executor, call) = self.call(index)?;
        let selector = call.batch.chain_selector;
        ctx.run(async {
            executor
                .execute(ctx, &call, options)
                .await
                .map_err(|source| EngineError::TimelockExecute { selector, index, source })
        })
        .await
    }
}

impl Engine {
    /// Runs the MCMS phase for the converted proposal. For `schedule`, then
    /// waits for the timelock to mark every batch ready and executes the
    /// batches in order.
    pub async fn execute_timelock(&self, ctx: &ExecContext, proposal: &TimelockProposal) -> Result<(), EngineError> {
        proposal.validate()?;
        let id = proposal.id();
        let result = self.run_timelock(ctx, &id, proposal).await;
        if let Err(e) = &result {
            warn!("[Timelock] Proposal {}: aborted: {}", id, e);
        }
        result
    }

    async fn run_timelock(&self, ctx: &ExecContext, id: &str, proposal: &TimelockProposal) -> Result<(), EngineError> {
        let chains = self.resolve_blockchains(proposal.chain_metadata.keys().copied())?;
        let converted = self.convert_timelock(ctx, proposal).await?;
        self.run_mcms(ctx, &converted.proposal, Some(proposal.action), &chains).await?;

        if proposal.action != TimelockAction::Schedule {
            info!("[Timelock] Proposal {}: {} complete after MCMS execution", id, proposal.action);
            return Ok(());
        }

        let mut executors = BTreeMap::new();
        let mut call_proxies = BTreeMap::new();
        for batch in &proposal.operations {
            let selector = batch.chain_selector;
            if executors.contains_key(&selector) {
                continue;
            }
            let chain = chains.get(&selector).ok_or(EngineError::BlockchainNotFound(selector))?;
            let factory = self.registry().timelock_executor_factory(self.directory().family_of(selector)?)?;
            executors.insert(selector, factory.make(chain)?);

            if factory.requires_call_proxy() {
                let timelock_address = proposal
                    .timelock_addresses
                    .get(&selector)
                    .ok_or(ValidationError::MissingTimelockAddress(selector))?;
                let proxy = resolve_call_proxy(self.address_store(), selector, timelock_address)?;
                debug!("[Timelock] Proposal {}: chain {} executes through CallProxy {}", id, selector, proxy);
                call_proxies.insert(selector, proxy);
            }
        }

        let executable = TimelockExecutable::new(proposal, &converted, executors)?;
        let config = self.config();
        executable.wait_until_ready(ctx, config.readiness_attempts, config.readiness_delay).await?;
        info!("[Timelock] Proposal {}: all {} batches ready", id, proposal.operations.len());

        for (index, batch) in proposal.operations.iter().enumerate() {
            let selector = batch.chain_selector;
            let options = TimelockExecuteOptions { call_proxy: call_proxies.get(&selector).cloned() };
            info!("[Timelock] Proposal {}: executing batch {} on chain {}", id, index, selector);
            let result = executable.execute(ctx, index, &options).await?;
            let chain = chains.get(&selector).ok_or(EngineError::BlockchainNotFound(selector))?;
            self.confirm(ctx, chain, &result).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{AddressRef, MemoryAddressStore};

    const SELECTOR: ChainSelector = ChainSelector(9);
    const TIMELOCK: &str = "0x00000000000000000000000000000000000000a1";

    fn timelock_ref(qualifier: &str) -> AddressRef {
        AddressRef::new(SELECTOR, RBAC_TIMELOCK, "1.0.0", qualifier, TIMELOCK)
    }

    fn proxy_ref(qualifier: &str, address: &str) -> AddressRef {
        AddressRef::new(SELECTOR, CALL_PROXY, "1.0.0", qualifier, address)
    }

    #[test]
    fn single_proxy_resolves_for_unqualified_timelock() {
        let store = MemoryAddressStore::from_refs([timelock_ref(""), proxy_ref("", "0xp1")]).unwrap();
        assert_eq!(resolve_call_proxy(&store, SELECTOR, TIMELOCK).unwrap(), "0xp1");
    }

    #[test]
    fn two_proxies_are_ambiguous_for_unqualified_timelock() {
        let store = MemoryAddressStore::from_refs([
            timelock_ref(""),
            proxy_ref("blue", "0xp1"),
            proxy_ref("green", "0xp2"),
        ])
        .unwrap();
        let err = resolve_call_proxy(&store, SELECTOR, TIMELOCK).unwrap_err();
        assert!(err.to_string().contains("multiple CallProxy addresses found"));
    }

    #[test]
    fn qualified_timelock_picks_matching_proxy() {
        let store = MemoryAddressStore::from_refs([
            timelock_ref("green"),
            proxy_ref("blue", "0xp1"),
            proxy_ref("green", "0xp2"),
        ])
        .unwrap();
        assert_eq!(resolve_call_proxy(&store, SELECTOR, TIMELOCK).unwrap(), "0xp2");
    }

    #[test]
    fn timelock_address_lookup_ignores_case() {
        let store = MemoryAddressStore::from_refs([timelock_ref(""), proxy_ref("", "0xp1")]).unwrap();
        assert!(resolve_call_proxy(&store, SELECTOR, &TIMELOCK.to_uppercase().replace("0X", "0x")).is_ok());
    }

    #[test]
    fn missing_refs_are_reported() {
        let store = MemoryAddressStore::new();
        let err = resolve_call_proxy(&store, SELECTOR, TIMELOCK).unwrap_err();
        assert!(err.to_string().contains(&format!("RBACTimelock address {} not found", TIMELOCK)));

        let store = MemoryAddressStore::from_refs([timelock_ref("blue"), proxy_ref("green", "0xp2")]).unwrap();
        let err = resolve_call_proxy(&store, SELECTOR, TIMELOCK).unwrap_err();
        assert_eq!(err.to_string(), "CallProxy not found for qualifier \"blue\" on chain selector 9");

        let store = MemoryAddressStore::from_refs([timelock_ref("")]).unwrap();
        let err = resolve_call_proxy(&store, SELECTOR, TIMELOCK).unwrap_err();
        assert!(matches!(err, EngineError::CallProxyNotFound { qualifier, .. } if qualifier.is_empty()));
    }
}
