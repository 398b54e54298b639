//! Swap preparation
//!
//! Builds the ordered step plan for a swap out of facts the caller already
//! holds: quote payloads, allowance state, wrap requirement. Nothing here
//! signs, broadcasts, or touches the store, so preparing twice from the
//! same inputs yields the same plan shape.

use chrono::{DateTime, Utc};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, U256};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::swap::{BlockingWarning, SwapContext, SwapPlan, SwapStep, TradeSummary};
use crate::txn::{AccountKind, AccountMeta, Routing};

/// Allowance grant the quote says is required
#[derive(Debug, Clone)]
pub struct ApprovalRequirement {
    pub request: TypedTransaction,
    pub token: Address,
    pub spender: Address,
    pub amount: U256,
    /// Hold the plan until the approval is mined
    pub wait_for_receipt: bool,
}

/// Native-token wrap the quote says is required
#[derive(Debug, Clone)]
pub struct WrapRequirement {
    pub request: TypedTransaction,
    pub amount: U256,
}

/// Order payload from a UniswapX quote
#[derive(Debug, Clone)]
pub struct OrderPayload {
    pub typed_data: TypedData,
    pub encoded_order: Bytes,
}

/// Everything preparation needs from the quote and the caller
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub account: AccountMeta,
    pub chain_id: u64,
    pub routing: Routing,
    pub trade: TradeSummary,
    pub deadline: DateTime<Utc>,
    pub private_relay: bool,
    /// Classic swap calldata from the quote
    pub swap_request: Option<TypedTransaction>,
    /// Order payload, for UniswapX routing
    pub order: Option<OrderPayload>,
    /// Permit to sign when allowance is granted off chain
    pub permit: Option<TypedData>,
    /// Set when the current allowance cannot cover the input
    pub approval: Option<ApprovalRequirement>,
    /// Set when the input is native and must be wrapped first
    pub wrap: Option<WrapRequirement>,
    /// Remote plan to report step completion to, when the quote carries one
    pub remote_plan_id: Option<Uuid>,
}

/// Result of preparation
#[derive(Debug, Clone)]
pub enum PrepareOutcome {
    /// Plan built; hand this to [`ExecuteSwapService`](crate::swap::ExecuteSwapService)
    Ready(SwapContext),
    /// Conditions the user must resolve before this swap can run
    Blocked(Vec<BlockingWarning>),
}

/// Build the execution plan for a swap
///
/// Step order is fixed: wrap, then approval, then permit, then the terminal
/// swap or order step. When `remote_plan_id` is set, a progress report
/// follows every on-chain step.
pub fn prepare(request: PrepareRequest) -> EngineResult<PrepareOutcome> {
    let mut warnings = Vec::new();
    if request.account.kind == AccountKind::ViewOnly {
        warnings.push(BlockingWarning::ViewOnlyAccount);
    }
    if request.deadline <= Utc::now() {
        warnings.push(BlockingWarning::QuoteExpired);
    }
    if !warnings.is_empty() {
        return Ok(PrepareOutcome::Blocked(warnings));
    }

    let mut steps = Vec::new();
    let mut completed = 0u32;

    if let Some(wrap) = request.wrap {
        steps.push(SwapStep::Wrap {
            request: wrap.request,
            amount: wrap.amount,
        });
        completed += 1;
        push_plan_update(&mut steps, request.remote_plan_id, completed);
    }

    if let Some(approval) = request.approval {
        steps.push(SwapStep::Approval {
            request: approval.request,
            token: approval.token,
            spender: approval.spender,
            amount: approval.amount,
            wait_for_receipt: approval.wait_for_receipt,
        });
        completed += 1;
        push_plan_update(&mut steps, request.remote_plan_id, completed);
    }

    if let Some(permit) = request.permit {
        steps.push(SwapStep::PermitSignature { typed_data: permit });
    }

    match request.routing {
        Routing::Classic => {
            let Some(swap_request) = request.swap_request else {
                return Err(EngineError::Validation(
                    "classic routing requires a swap transaction request".to_string(),
                ));
            };
            steps.push(SwapStep::SwapSubmission {
                request: swap_request,
            });
            completed += 1;
            push_plan_update(&mut steps, request.remote_plan_id, completed);
        }
        Routing::UniswapX => {
            let Some(order) = request.order else {
                return Err(EngineError::Validation(
                    "uniswapx routing requires an order payload".to_string(),
                ));
            };
            steps.push(SwapStep::OrderSignature {
                typed_data: order.typed_data,
                encoded_order: order.encoded_order,
                quote_id: request.trade.quote_id.clone(),
            });
        }
    }

    let plan = SwapPlan::new(steps);
    info!(
        "Prepared {:?} swap plan {} with {} steps on chain {}",
        request.routing,
        plan.id(),
        plan.len(),
        request.chain_id
    );

    Ok(PrepareOutcome::Ready(SwapContext {
        account: request.account,
        chain_id: request.chain_id,
        routing: request.routing,
        trade: request.trade,
        plan,
        deadline: request.deadline,
        private_relay: request.private_relay,
    }))
}

fn push_plan_update(steps: &mut Vec<SwapStep>, remote_plan_id: Option<Uuid>, completed: u32) {
    if let Some(plan_id) = remote_plan_id {
        steps.push(SwapStep::PlanUpdate {
            plan_id,
            completed_step: completed,
        });
    }
}
