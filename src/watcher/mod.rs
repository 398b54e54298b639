//! Transaction watching
//!
//! Every incomplete transaction gets its own watcher task:
//! - Broadcast transactions poll for receipts and detect replacement
//! - Signed orders poll the order service and pick up the settlement fill
//! - The supervisor owns the task registry and startup reconciliation

pub mod onchain;
pub mod order;
pub mod supervisor;

pub use onchain::OnChainWatcher;
pub use order::OrderWatcher;
pub use supervisor::WatcherSupervisor;
