pub mod blockhash;
pub mod pool;

use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;

use crate::error::TradeError;

pub use blockhash::BlockhashCache;
pub use pool::{RpcPool, RpcPoolConfig};

/// Narrow seam over the chain RPC surface used by the execution layer.
///
/// `RpcPool` is the production implementation; tests substitute counting
/// or scripted mocks.
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Latest blockhash plus the last block height it is valid for.
    async fn latest_blockhash(&self) -> Result<(Hash, u64), TradeError>;

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, TradeError>;

    /// Wait (bounded) until the signature reaches confirmed commitment.
    async fn confirm_signature(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<(), TradeError>;
}
