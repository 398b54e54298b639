//! Transaction submission module with nonce resolution and step execution

mod executor;
mod nonce;

pub use executor::{PlanRun, StepExecutor, StepOutcome};
pub use nonce::{NonceResolver, ResolvedNonce};
