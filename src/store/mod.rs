//! Transaction store
//!
//! This module provides:
//! - The [`TransactionStore`] trait the rest of the engine writes through
//! - An in-memory backend for tests and short-lived embedders
//! - A PostgreSQL backend for hosts that persist across restarts
//!
//! Every successful write is broadcast to subscribers; the watcher
//! supervisor drives itself off that feed. Writes against a record that
//! already reached a final status are dropped: the stored row comes back
//! untouched and no event fires.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use ethers::types::Address;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::txn::TransactionDetails;

/// Durable lifecycle state with change subscriptions
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fetch one record by id
    async fn get(&self, id: Uuid) -> EngineResult<Option<TransactionDetails>>;

    /// Insert or update a record, returning what is now stored
    ///
    /// Records in a final status are immutable: the write is ignored, the
    /// stored row is returned, and no change event is emitted.
    async fn upsert(&self, tx: TransactionDetails) -> EngineResult<TransactionDetails>;

    /// All records that have not reached a final status
    async fn incomplete(&self) -> EngineResult<Vec<TransactionDetails>>;

    /// Pending private-relay submissions for an account on one chain
    ///
    /// Feeds nonce resolution: these are transactions the public mempool
    /// cannot see.
    async fn pending_private_count(&self, from: Address, chain_id: u64) -> EngineResult<u64>;

    /// Subscribe to record changes
    fn subscribe(&self) -> broadcast::Receiver<TransactionDetails>;
}
