//! Swap execution
//!
//! Drives a prepared plan step by step. A failed step stops the plan where
//! it stands: anything already broadcast keeps its watcher, and nothing
//! after the failed step is attempted. Re-running a plan later starts a
//! fresh run with freshly resolved nonces.

use chrono::Utc;
use ethers::types::{Signature, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::orders::{OrderService, SignedOrder};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::store::TransactionStore;
use crate::swap::{StepStatus, SwapContext, SwapStep};
use crate::tx::{PlanRun, StepExecutor, StepOutcome};
use crate::txn::{QueueStatus, TransactionDetails, TransactionStatus, TypeInfo};

/// Host hooks invoked as a plan progresses
///
/// `on_pending` fires at most once per run, the first time the user is
/// left waiting on something slower than a signature prompt.
pub trait SwapCallbacks: Send + Sync {
    fn set_current_step(&self, index: usize, step: &SwapStep);
    fn on_pending(&self);
    fn on_success(&self);
    fn on_failure(&self, error: &EngineError);
}

/// Cooperative cancellation checked between steps
///
/// Cancelling never claws back a transaction that already went out; it
/// only stops further steps from starting.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<RwLock<bool>>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cancel(&self) {
        *self.0.write().await = true;
    }

    pub async fn is_cancelled(&self) -> bool {
        *self.0.read().await
    }
}

/// Runs prepared swap plans
pub struct ExecuteSwapService {
    executor: Arc<StepExecutor>,
    store: Arc<dyn TransactionStore>,
    orders: Arc<dyn OrderService>,
    notifier: Arc<dyn Notifier>,
    config: Arc<EngineConfig>,
}

impl ExecuteSwapService {
    pub fn new(
        executor: Arc<StepExecutor>,
        store: Arc<dyn TransactionStore>,
        orders: Arc<dyn OrderService>,
        notifier: Arc<dyn Notifier>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            executor,
            store,
            orders,
            notifier,
            config,
        }
    }

    /// Execute a prepared swap plan to completion
    pub async fn execute(
        &self,
        ctx: SwapContext,
        callbacks: Arc<dyn SwapCallbacks>,
        cancel: CancelFlag,
    ) -> EngineResult<()> {
        if let Err(e) = ctx.ensure_valid(self.executor.signer_address(), Utc::now()) {
            error!("Swap context rejected: {}", e);
            callbacks.on_failure(&e);
            return Err(e);
        }

        let use_relay = self.executor.nonces().use_private_relay(ctx.chain_id);
        let mut run = PlanRun::new(&ctx, use_relay);
        let mut statuses = vec![StepStatus::NotStarted; ctx.plan.len()];
        let mut pending_notified = false;
        let total = ctx.plan.len();

        info!(
            "Executing swap plan {} ({} steps, chain {}, private: {})",
            ctx.plan.id(),
            total,
            ctx.chain_id,
            run.private_relay
        );

        for (index, step) in ctx.plan.steps().iter().enumerate() {
            if cancel.is_cancelled().await {
                info!(
                    "Swap plan {} cancelled before step {}",
                    ctx.plan.id(),
                    index
                );
                return Ok(());
            }

            callbacks.set_current_step(index, step);
            statuses[index] = StepStatus::Signing;

            match self.executor.execute_step(&mut run, step).await {
                Ok(StepOutcome::Submitted(record)) => {
                    statuses[index] = StepStatus::Submitted;
                    debug!("Step {} submitted as transaction {}", index, record.id);
                }
                Ok(StepOutcome::Confirmed(record)) => {
                    statuses[index] = StepStatus::Confirmed;
                    debug!("Step {} mined as transaction {}", index, record.id);
                    // Blocking on inclusion means the user already sat
                    // through at least one block
                    if index + 1 < total && !pending_notified {
                        callbacks.on_pending();
                        pending_notified = true;
                    }
                }
                Ok(StepOutcome::Signed) | Ok(StepOutcome::Updated) => {
                    statuses[index] = StepStatus::Confirmed;
                }
                Ok(StepOutcome::OrderSigned {
                    order_hash,
                    signature,
                }) => {
                    let result = self
                        .submit_order(&ctx, &run, step, order_hash, signature, callbacks.as_ref())
                        .await;
                    statuses[index] = match result {
                        Ok(()) => StepStatus::Submitted,
                        Err(_) => StepStatus::Failed,
                    };
                    debug!("Plan {} finished: {:?}", ctx.plan.id(), statuses);
                    // An order signature is always the terminal step
                    return result;
                }
                Err(e) => {
                    statuses[index] = StepStatus::Failed;
                    error!("Swap step {} ({}) failed: {}", index, step.kind(), e);
                    callbacks.on_failure(&e);
                    return Err(e);
                }
            }
        }

        debug!("Plan {} finished: {:?}", ctx.plan.id(), statuses);
        callbacks.on_success();
        Ok(())
    }

    /// Record the signed order, then hand it to the order service
    async fn submit_order(
        &self,
        ctx: &SwapContext,
        run: &PlanRun,
        step: &SwapStep,
        order_hash: H256,
        signature: Signature,
        callbacks: &dyn SwapCallbacks,
    ) -> EngineResult<()> {
        let SwapStep::OrderSignature {
            encoded_order,
            quote_id,
            ..
        } = step
        else {
            return Err(EngineError::Internal(
                "order submission without an order step".to_string(),
            ));
        };

        let type_info = TypeInfo::Swap {
            input: run.trade.input,
            output: run.trade.output,
            input_amount: run.trade.input_amount,
            min_output_amount: run.trade.min_output_amount,
        };
        let record = TransactionDetails::new_order(
            ctx.chain_id,
            ctx.account.address,
            type_info,
            order_hash,
        );
        let record = self.store.upsert(record).await?;

        // The order rests with fillers from here; that wait is always
        // user-visible
        callbacks.on_pending();

        let submission = SignedOrder {
            chain_id: ctx.chain_id,
            order_hash,
            encoded_order: encoded_order.clone(),
            signature,
            quote_id: quote_id.clone(),
        };
        let policy = RetryPolicy::new(
            self.config.executor.order_submit_attempts,
            Duration::from_millis(self.config.executor.retry_base_delay_ms),
        );

        match run_with_retry("order submission", policy, || {
            self.orders.submit_order(&submission)
        })
        .await
        {
            Ok(()) => {
                info!("Order {:?} accepted by the order service", order_hash);
                metrics::record_order_submitted(ctx.chain_id);

                let mut accepted = record.clone();
                accepted.queue_status = Some(QueueStatus::Submitted);
                self.store.upsert(accepted).await?;
                callbacks.on_success();
                Ok(())
            }
            Err(e) => {
                error!("Order {:?} submission failed: {}", order_hash, e);

                let mut failed = record.clone();
                failed.queue_status = Some(QueueStatus::SubmissionFailed);
                failed.status = TransactionStatus::Failed;
                self.store.upsert(failed).await?;

                self.notifier
                    .push(Notification::OrderSubmissionFailed {
                        address: ctx.account.address,
                        id: record.id,
                    })
                    .await;
                callbacks.on_failure(&e);
                Err(e)
            }
        }
    }
}
