// Chain families, blockchain handles and the capability seams

pub mod aptos;
pub mod encoder;
pub mod evm;
pub mod family;
pub mod interface;
pub mod solana;

pub use encoder::Encoder;
pub use family::{ChainDetails, ChainDirectory, ChainFamily};
pub use interface::{
    sign_payload, BlockChain, BlockChains, ConvertRequest, ConvertedBatch, Environment, ExecuteRequest, Executor,
    Inspector, RawTransaction, SetRootRequest, SignedPayload, TimelockCall, TimelockConverter, TimelockExecuteOptions,
    TimelockExecutor, TransactionResult,
};
