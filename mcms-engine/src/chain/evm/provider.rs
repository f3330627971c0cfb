use super::EvmClient;
use crate::error::ChainError;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionReceipt, H256};
use std::sync::Arc;

/// `EvmClient` over any ethers middleware stack (Provider<Http>, Provider<Ws>, ...).
#[derive(Debug, Clone)]
pub struct EthersClient<M> {
    provider: Arc<M>,
}

impl<M: Middleware> EthersClient<M> {
    pub fn new(provider: Arc<M>) -> Self {
        EthersClient { provider }
    }

    pub fn provider(&self) -> &Arc<M> {
        &self.provider
    }
}

fn rpc_error<E: std::fmt::Display>(e: E) -> ChainError {
    ChainError::Rpc(e.to_string())
}

#[async_trait]
impl<M> EvmClient for EthersClient<M>
where
    M: Middleware + 'static,
{
    async fn fill_transaction(&self, tx: &mut TypedTransaction) -> Result<(), ChainError> {
        self.provider.fill_transaction(tx, None).await.map_err(rpc_error)
    }

    async fn send_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        self.provider
            .send_raw_transaction(raw)
            .await
            .map(|pending| pending.tx_hash())
            .map_err(rpc_error)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        self.provider.call(tx, None).await.map_err(rpc_error)
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        self.provider.get_transaction_receipt(hash).await.map_err(rpc_error)
    }
}
