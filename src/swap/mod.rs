//! Swap plan construction and execution
//!
//! This module provides:
//! - Step and plan types shared by preparation and execution
//! - [`prepare`]: turns quote facts into an ordered, immutable plan
//! - [`ExecuteSwapService`]: runs a prepared plan step by step
//!
//! A plan is built once, up front, from facts the caller already holds
//! (allowance, wrap requirement, routing). Execution never reorders or
//! extends it.

pub mod execute;
pub mod prepare;

pub use execute::{CancelFlag, ExecuteSwapService, SwapCallbacks};
pub use prepare::{
    prepare, ApprovalRequirement, OrderPayload, PrepareOutcome, PrepareRequest, WrapRequirement,
};

use chrono::{DateTime, Utc};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, U256};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::txn::{AccountKind, AccountMeta, Routing};

/// One unit of work within a swap plan
#[derive(Debug, Clone)]
pub enum SwapStep {
    /// Native-token wrap that must land before the swap
    Wrap { request: TypedTransaction, amount: U256 },
    /// ERC-20 allowance grant that must land before the swap
    Approval {
        request: TypedTransaction,
        token: Address,
        spender: Address,
        amount: U256,
        /// Block the plan until this approval is mined
        wait_for_receipt: bool,
    },
    /// Off-chain permit signature consumed by the swap calldata
    PermitSignature { typed_data: TypedData },
    /// The swap transaction itself
    SwapSubmission { request: TypedTransaction },
    /// EIP-712 order signature handed to the order service
    OrderSignature {
        typed_data: TypedData,
        encoded_order: Bytes,
        quote_id: String,
    },
    /// Progress report to the remote planning service
    PlanUpdate { plan_id: Uuid, completed_step: u32 },
}

impl SwapStep {
    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SwapStep::Wrap { .. } => "wrap",
            SwapStep::Approval { .. } => "approval",
            SwapStep::PermitSignature { .. } => "permit_signature",
            SwapStep::SwapSubmission { .. } => "swap_submission",
            SwapStep::OrderSignature { .. } => "order_signature",
            SwapStep::PlanUpdate { .. } => "plan_update",
        }
    }

    /// Whether this step broadcasts a transaction
    pub fn is_on_chain(&self) -> bool {
        matches!(
            self,
            SwapStep::Wrap { .. } | SwapStep::Approval { .. } | SwapStep::SwapSubmission { .. }
        )
    }
}

/// Where a step is in its own lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    NotStarted,
    Signing,
    Submitted,
    Confirmed,
    Failed,
}

/// Ordered, immutable list of steps produced by [`prepare`]
#[derive(Debug, Clone)]
pub struct SwapPlan {
    id: Uuid,
    steps: Vec<SwapStep>,
}

impl SwapPlan {
    pub(crate) fn new(steps: Vec<SwapStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            steps,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn steps(&self) -> &[SwapStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// What is being traded, kept on the swap record
#[derive(Debug, Clone)]
pub struct TradeSummary {
    pub input: Address,
    pub output: Address,
    pub input_amount: U256,
    pub min_output_amount: U256,
    pub quote_id: String,
}

/// Conditions that must be resolved before a swap may execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingWarning {
    /// The account cannot sign
    ViewOnlyAccount,
    /// The quote's deadline already passed
    QuoteExpired,
}

/// Validated inputs for one swap execution
#[derive(Debug, Clone)]
pub struct SwapContext {
    pub account: AccountMeta,
    pub chain_id: u64,
    pub routing: Routing,
    pub trade: TradeSummary,
    pub plan: SwapPlan,
    /// After this instant the quote is no longer executable
    pub deadline: DateTime<Utc>,
    /// Route submissions through a private relay when available
    pub private_relay: bool,
}

impl SwapContext {
    /// Re-check the context at execution time
    ///
    /// Preparation and execution are separated by user think-time, so the
    /// account may have switched and the quote may have lapsed in between.
    pub fn ensure_valid(&self, signer_address: Address, now: DateTime<Utc>) -> EngineResult<()> {
        if self.account.kind == AccountKind::ViewOnly {
            return Err(EngineError::Signing(
                "view-only account cannot execute swaps".to_string(),
            ));
        }
        if self.account.address != signer_address {
            return Err(EngineError::AccountMismatch);
        }
        if now > self.deadline {
            return Err(EngineError::QuoteExpired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(deadline: DateTime<Utc>) -> SwapContext {
        SwapContext {
            account: AccountMeta::signer(Address::repeat_byte(1)),
            chain_id: 1,
            routing: Routing::Classic,
            trade: TradeSummary {
                input: Address::repeat_byte(2),
                output: Address::repeat_byte(3),
                input_amount: U256::from(1000),
                min_output_amount: U256::from(990),
                quote_id: "quote-1".to_string(),
            },
            plan: SwapPlan::new(vec![SwapStep::SwapSubmission {
                request: TypedTransaction::default(),
            }]),
            deadline,
            private_relay: false,
        }
    }

    #[test]
    fn stale_deadline_fails_validation() {
        let ctx = context(Utc::now() - chrono::Duration::seconds(1));
        let err = ctx
            .ensure_valid(Address::repeat_byte(1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::QuoteExpired));
    }

    #[test]
    fn different_signer_fails_validation() {
        let ctx = context(Utc::now() + chrono::Duration::minutes(5));
        let err = ctx
            .ensure_valid(Address::repeat_byte(9), Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::AccountMismatch));
    }

    #[test]
    fn matching_signer_within_deadline_passes() {
        let ctx = context(Utc::now() + chrono::Duration::minutes(5));
        assert!(ctx.ensure_valid(Address::repeat_byte(1), Utc::now()).is_ok());
    }
}
