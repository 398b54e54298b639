//! Off-chain order service seam
//!
//! UniswapX swaps do not broadcast a transaction. The engine signs an order,
//! posts it to an order service, and a filler settles it on chain later.
//! This module defines the service trait plus the mapping from the remote
//! status vocabulary onto our transaction lifecycle.

use async_trait::async_trait;
use ethers::types::{Bytes, Signature, H256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::txn::TransactionStatus;

/// Status vocabulary of the remote order service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteOrderStatus {
    Open,
    Filled,
    Cancelled,
    Expired,
    Error,
    InsufficientFunds,
    /// Service has not verified the order yet
    Unverified,
}

impl RemoteOrderStatus {
    /// Map the remote vocabulary onto the transaction lifecycle
    pub fn to_transaction_status(self) -> TransactionStatus {
        match self {
            RemoteOrderStatus::Open => TransactionStatus::Pending,
            RemoteOrderStatus::Filled => TransactionStatus::Success,
            RemoteOrderStatus::Cancelled => TransactionStatus::Canceled,
            RemoteOrderStatus::Expired => TransactionStatus::Expired,
            RemoteOrderStatus::Error => TransactionStatus::Failed,
            RemoteOrderStatus::InsufficientFunds => TransactionStatus::InsufficientFunds,
            RemoteOrderStatus::Unverified => TransactionStatus::Unknown,
        }
    }
}

/// Snapshot of one order as the service sees it
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub status: RemoteOrderStatus,
    /// Hash of the on-chain settlement transaction, once filled
    pub settlement_hash: Option<H256>,
}

/// Signed order ready for submission
#[derive(Debug, Clone)]
pub struct SignedOrder {
    pub chain_id: u64,
    pub order_hash: H256,
    /// Serialized order payload from the quote
    pub encoded_order: Bytes,
    pub signature: Signature,
    pub quote_id: String,
}

/// Progress report for a multi-step plan tracked remotely
#[derive(Debug, Clone)]
pub struct PlanUpdate {
    pub plan_id: Uuid,
    /// Index of the step that just completed
    pub completed_step: u32,
    pub tx_hash: Option<H256>,
}

/// Client for the off-chain order service
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Submit a signed order for filling
    async fn submit_order(&self, order: &SignedOrder) -> EngineResult<()>;

    /// Current status of a previously submitted order
    async fn order_status(&self, order_hash: H256) -> EngineResult<OrderUpdate>;

    /// Report step completion for a remotely tracked plan
    async fn update_plan(&self, update: &PlanUpdate) -> EngineResult<()>;
}
