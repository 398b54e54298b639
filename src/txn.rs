//! Core transaction data model
//!
//! Every approval, wrap, swap, and signed order the engine produces becomes
//! a [`TransactionDetails`] record. Records are written to the store before
//! broadcast and updated by watchers until they reach a final status.

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Submission path for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// Signed transaction broadcast to a chain
    Classic,
    /// Signed order handed to the off-chain order service
    UniswapX,
}

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Canceled,
    Expired,
    /// Order is parked until the account can cover it
    InsufficientFunds,
    /// Remote service has no verdict for the order yet
    Unknown,
}

impl TransactionStatus {
    /// Final statuses never change again once recorded
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::Failed
                | TransactionStatus::Canceled
                | TransactionStatus::Expired
        )
    }
}

/// Submission progress of an off-chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Signed but not yet accepted by the order service
    Waiting,
    /// Accepted by the order service
    Submitted,
    /// Found still waiting after a restart; the order never left the device
    AppClosed,
    /// Order service rejected the submission after all retries
    SubmissionFailed,
}

/// What the transaction does, with the fields needed to describe it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeInfo {
    Swap {
        input: Address,
        output: Address,
        input_amount: U256,
        min_output_amount: U256,
    },
    Approval {
        token: Address,
        spender: Address,
        amount: U256,
    },
    Wrap {
        amount: U256,
    },
    Send {
        recipient: Address,
        amount: U256,
    },
    Receive {
        sender: Address,
        amount: U256,
    },
}

/// Receipt fields captured when a transaction lands on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_index: u64,
    pub gas_used: U256,
    pub effective_gas_price: U256,
    /// Whether the transaction executed without reverting
    pub status_ok: bool,
    pub confirmed_time: DateTime<Utc>,
}

impl TxReceipt {
    /// Build from a provider receipt; None when the receipt is not yet mined
    pub fn from_ethers(receipt: &ethers::types::TransactionReceipt) -> Option<Self> {
        let block_number = receipt.block_number?.as_u64();
        let block_hash = receipt.block_hash?;
        Some(Self {
            block_number,
            block_hash,
            transaction_index: receipt.transaction_index.as_u64(),
            gas_used: receipt.gas_used.unwrap_or_default(),
            effective_gas_price: receipt.effective_gas_price.unwrap_or_default(),
            status_ok: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            confirmed_time: Utc::now(),
        })
    }
}

/// Kind of account behind an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Holds keys and can sign
    Mnemonic,
    /// Watched address with no signing capability
    ViewOnly,
}

/// Address plus what we can do with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub address: Address,
    pub kind: AccountKind,
}

impl AccountMeta {
    pub fn signer(address: Address) -> Self {
        Self {
            address,
            kind: AccountKind::Mnemonic,
        }
    }

    pub fn view_only(address: Address) -> Self {
        Self {
            address,
            kind: AccountKind::ViewOnly,
        }
    }
}

/// Durable record of one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub id: Uuid,
    pub chain_id: u64,
    pub from: Address,
    pub routing: Routing,
    pub type_info: TypeInfo,
    pub status: TransactionStatus,
    /// Only set for off-chain orders
    pub queue_status: Option<QueueStatus>,
    /// On-chain hash; for orders this is the settlement hash once filled
    pub hash: Option<H256>,
    /// Identifying hash of a signed off-chain order
    pub order_hash: Option<H256>,
    pub nonce: Option<u64>,
    /// Whether the transaction was sent through a private relay
    pub private_relay: bool,
    pub receipt: Option<TxReceipt>,
    pub added_time: DateTime<Utc>,
}

impl TransactionDetails {
    /// New on-chain submission record
    pub fn new_classic(chain_id: u64, from: Address, type_info: TypeInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            from,
            routing: Routing::Classic,
            type_info,
            status: TransactionStatus::Pending,
            queue_status: None,
            hash: None,
            order_hash: None,
            nonce: None,
            private_relay: false,
            receipt: None,
            added_time: Utc::now(),
        }
    }

    /// New off-chain order record, starting in the waiting queue
    pub fn new_order(chain_id: u64, from: Address, type_info: TypeInfo, order_hash: H256) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            from,
            routing: Routing::UniswapX,
            type_info,
            status: TransactionStatus::Pending,
            queue_status: Some(QueueStatus::Waiting),
            hash: None,
            order_hash: Some(order_hash),
            nonce: None,
            private_relay: false,
            receipt: None,
            added_time: Utc::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    pub fn is_order(&self) -> bool {
        self.routing == Routing::UniswapX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_statuses_are_exactly_the_four_settled_ones() {
        assert!(TransactionStatus::Success.is_final());
        assert!(TransactionStatus::Failed.is_final());
        assert!(TransactionStatus::Canceled.is_final());
        assert!(TransactionStatus::Expired.is_final());
        assert!(!TransactionStatus::Pending.is_final());
        assert!(!TransactionStatus::InsufficientFunds.is_final());
        assert!(!TransactionStatus::Unknown.is_final());
    }

    #[test]
    fn order_records_start_waiting() {
        let tx = TransactionDetails::new_order(
            1,
            Address::zero(),
            TypeInfo::Swap {
                input: Address::zero(),
                output: Address::repeat_byte(2),
                input_amount: U256::from(1000),
                min_output_amount: U256::from(990),
            },
            H256::repeat_byte(7),
        );
        assert_eq!(tx.routing, Routing::UniswapX);
        assert_eq!(tx.queue_status, Some(QueueStatus::Waiting));
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.hash.is_none());
    }
}
