//! Outbound notifications
//!
//! The engine reports user-visible events here; the host decides how to
//! render them (push, toast, badge). Implementations must not block.

use async_trait::async_trait;
use ethers::types::Address;
use uuid::Uuid;

use crate::txn::TransactionStatus;

/// Events the host may want to surface to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A watched transaction reached a final status
    TransactionFinalized {
        address: Address,
        id: Uuid,
        status: TransactionStatus,
    },
    /// A watcher died; the record may be stale until the next restart
    WatcherFailed { address: Address, id: Uuid },
    /// An order could not be handed to the order service
    OrderSubmissionFailed { address: Address, id: Uuid },
}

/// Sink for engine notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(&self, notification: Notification);
}

/// Discards everything; for headless embedders and tests
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn push(&self, _notification: Notification) {}
}
