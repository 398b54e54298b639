//! Chain access trait
//!
//! The engine never talks JSON-RPC directly. Hosts hand it implementations
//! of [`ChainClient`]: one per public endpoint, and optionally one per
//! private relay endpoint.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineResult;

/// Minimal provider surface the engine needs per endpoint
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain this client is connected to
    fn chain_id(&self) -> u64;

    /// Broadcast a signed raw transaction and return its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> EngineResult<H256>;

    /// Receipt for a hash, or None while still unmined
    async fn transaction_receipt(&self, hash: H256) -> EngineResult<Option<TransactionReceipt>>;

    /// Transaction count for `address` including mempool entries
    async fn pending_transaction_count(&self, address: Address) -> EngineResult<u64>;

    /// Transaction count for `address` as of the latest block
    async fn latest_transaction_count(&self, address: Address) -> EngineResult<u64>;
}

/// Poll until the receipt shows up
///
/// Used when a step must land before the next one may go out. Transient
/// provider errors are logged and polling continues; callers that need a
/// bound should wrap this in a timeout.
pub async fn wait_for_receipt(
    client: &Arc<dyn ChainClient>,
    hash: H256,
    poll_interval: Duration,
) -> EngineResult<TransactionReceipt> {
    loop {
        match client.transaction_receipt(hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    "Receipt poll failed for {:?} on chain {}: {}",
                    hash,
                    client.chain_id(),
                    e
                );
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(poll_interval).await;
    }
}
