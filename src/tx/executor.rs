//! Step execution: sign, record, broadcast, and gate on inclusion
//!
//! Each on-chain step is written to the store before its transaction goes
//! out, so a crash between broadcast and bookkeeping cannot lose the
//! submission. Off-chain steps (permits, order signatures, plan updates)
//! leave no record; their effects ride on the terminal step.

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::Eip712;
use ethers::types::{Signature, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::nonce::NonceResolver;
use crate::chain::{ChainClient, ChainRegistry};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::orders::{OrderService, PlanUpdate};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::signer::TransactionSigner;
use crate::store::TransactionStore;
use crate::swap::{SwapContext, SwapStep, TradeSummary};
use crate::txn::{AccountMeta, TransactionDetails, TypeInfo};

/// Mutable cursor threaded through one plan run
///
/// The first submission resolves a fresh nonce; every later submission in
/// the same run takes the next one, even while earlier transactions are
/// still unmined.
pub struct PlanRun {
    pub chain_id: u64,
    pub account: AccountMeta,
    pub trade: TradeSummary,
    /// Effective submission path for this run
    pub private_relay: bool,
    next_nonce: Option<u64>,
    /// Captured permit, consumed by the terminal step's calldata
    pub permit_signature: Option<Signature>,
    last_tx_hash: Option<H256>,
}

impl PlanRun {
    pub fn new(ctx: &SwapContext, use_relay: bool) -> Self {
        Self {
            chain_id: ctx.chain_id,
            account: ctx.account,
            trade: ctx.trade.clone(),
            private_relay: ctx.private_relay && use_relay,
            next_nonce: None,
            permit_signature: None,
            last_tx_hash: None,
        }
    }
}

/// What a single step produced
#[derive(Debug)]
pub enum StepOutcome {
    /// Transaction broadcast; its record is now pending
    Submitted(TransactionDetails),
    /// Transaction broadcast and mined without reverting
    Confirmed(TransactionDetails),
    /// Off-chain signature captured into the run
    Signed,
    /// Order signed; the caller owns submission to the order service
    OrderSigned {
        order_hash: H256,
        signature: Signature,
    },
    /// Plan progress delivered to the order service
    Updated,
}

/// Executes individual plan steps
pub struct StepExecutor {
    registry: Arc<ChainRegistry>,
    store: Arc<dyn TransactionStore>,
    signer: Arc<dyn TransactionSigner>,
    nonces: Arc<NonceResolver>,
    orders: Arc<dyn OrderService>,
    config: Arc<EngineConfig>,
}

impl StepExecutor {
    pub fn new(
        registry: Arc<ChainRegistry>,
        store: Arc<dyn TransactionStore>,
        signer: Arc<dyn TransactionSigner>,
        nonces: Arc<NonceResolver>,
        orders: Arc<dyn OrderService>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            store,
            signer,
            nonces,
            orders,
            config,
        }
    }

    pub fn nonces(&self) -> &NonceResolver {
        &self.nonces
    }

    /// Address of the account this executor signs for
    pub fn signer_address(&self) -> ethers::types::Address {
        self.signer.address()
    }

    /// Run one step to completion
    pub async fn execute_step(
        &self,
        run: &mut PlanRun,
        step: &SwapStep,
    ) -> EngineResult<StepOutcome> {
        debug!("Executing {} step on chain {}", step.kind(), run.chain_id);

        let result = self.dispatch(run, step).await;
        match &result {
            Ok(_) => metrics::record_step_executed(run.chain_id, step.kind()),
            Err(_) => metrics::record_step_failed(run.chain_id, step.kind()),
        }
        result
    }

    async fn dispatch(&self, run: &mut PlanRun, step: &SwapStep) -> EngineResult<StepOutcome> {
        match step {
            SwapStep::Wrap { request, amount } => {
                self.submit_on_chain(run, request, TypeInfo::Wrap { amount: *amount }, false)
                    .await
            }
            SwapStep::Approval {
                request,
                token,
                spender,
                amount,
                wait_for_receipt,
            } => {
                let wait = *wait_for_receipt
                    || self
                        .config
                        .chain_by_id(run.chain_id)
                        .map(|c| c.approval_wait_for_receipt)
                        .unwrap_or(false);
                self.submit_on_chain(
                    run,
                    request,
                    TypeInfo::Approval {
                        token: *token,
                        spender: *spender,
                        amount: *amount,
                    },
                    wait,
                )
                .await
            }
            SwapStep::SwapSubmission { request } => {
                let type_info = TypeInfo::Swap {
                    input: run.trade.input,
                    output: run.trade.output,
                    input_amount: run.trade.input_amount,
                    min_output_amount: run.trade.min_output_amount,
                };
                self.submit_on_chain(run, request, type_info, false).await
            }
            SwapStep::PermitSignature { typed_data } => {
                let signature = self.signer.sign_typed_data(typed_data).await?;
                run.permit_signature = Some(signature);
                debug!("Permit captured for chain {}", run.chain_id);
                Ok(StepOutcome::Signed)
            }
            SwapStep::OrderSignature { typed_data, .. } => {
                let order_hash = H256::from(
                    typed_data
                        .encode_eip712()
                        .map_err(|e| EngineError::Signing(e.to_string()))?,
                );
                let signature = self.signer.sign_typed_data(typed_data).await?;
                Ok(StepOutcome::OrderSigned {
                    order_hash,
                    signature,
                })
            }
            SwapStep::PlanUpdate {
                plan_id,
                completed_step,
            } => {
                let update = PlanUpdate {
                    plan_id: *plan_id,
                    completed_step: *completed_step,
                    tx_hash: run.last_tx_hash,
                };
                let policy = RetryPolicy::new(
                    self.config.executor.plan_update_attempts,
                    Duration::from_millis(self.config.executor.retry_base_delay_ms),
                );
                run_with_retry("plan update", policy, || self.orders.update_plan(&update))
                    .await?;
                Ok(StepOutcome::Updated)
            }
        }
    }

    /// Sign, record, broadcast, and optionally block until mined
    async fn submit_on_chain(
        &self,
        run: &mut PlanRun,
        request: &TypedTransaction,
        type_info: TypeInfo,
        wait_for_receipt: bool,
    ) -> EngineResult<StepOutcome> {
        let chain_id = run.chain_id;
        let client: Arc<dyn ChainClient> = if run.private_relay {
            self.registry
                .relay(chain_id)
                .ok_or(EngineError::ChainNotFound { chain_id })?
        } else {
            self.registry.provider(chain_id)?
        };

        let nonce = match run.next_nonce {
            Some(n) => Some(n),
            None => self
                .nonces
                .resolve(run.account.address, chain_id)
                .await
                .map(|r| r.nonce),
        };

        let mut request = request.clone();
        request.set_chain_id(chain_id);
        if let Some(n) = nonce {
            request.set_nonce(n);
        }

        // Durable record before anything reaches the network
        let mut record = TransactionDetails::new_classic(chain_id, run.account.address, type_info);
        record.nonce = nonce;
        record.private_relay = run.private_relay;
        let record = self.store.upsert(record).await?;

        let raw = self.signer.sign_transaction(&request).await?;

        let send_timeout = Duration::from_secs(self.config.executor.broadcast_timeout_secs);
        let tx_hash = match timeout(send_timeout, client.send_raw_transaction(raw)).await {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => {
                let mapped = classify_submission_error(chain_id, e);
                error!("Broadcast failed on chain {}: {}", chain_id, mapped);
                return Err(mapped);
            }
            Err(_) => {
                warn!(
                    "Broadcast timed out on chain {} after {:?}",
                    chain_id, send_timeout
                );
                return Err(EngineError::Timeout {
                    operation: "send transaction".to_string(),
                });
            }
        };

        info!(
            "Transaction sent: {:?} on chain {} (nonce {:?}, private: {})",
            tx_hash, chain_id, nonce, run.private_relay
        );
        metrics::record_tx_submitted(chain_id);

        let mut record = record;
        record.hash = Some(tx_hash);
        let record = self.store.upsert(record).await?;

        if let Some(n) = nonce {
            run.next_nonce = Some(n + 1);
        }
        run.last_tx_hash = Some(tx_hash);

        if wait_for_receipt {
            let poll = Duration::from_millis(self.config.executor.receipt_poll_interval_ms);
            let receipt = crate::chain::wait_for_receipt(&client, tx_hash, poll).await?;
            let reverted = receipt.status.map(|s| s.as_u64() != 1).unwrap_or(true);
            if reverted {
                // The watcher finalizes the record; stopping the plan is
                // this path's job
                return Err(EngineError::Submission {
                    chain_id,
                    message: format!("transaction {:?} reverted", tx_hash),
                });
            }
            info!("Transaction mined before continuing: {:?}", tx_hash);
            return Ok(StepOutcome::Confirmed(record));
        }

        Ok(StepOutcome::Submitted(record))
    }
}

/// Sharpen provider errors that have a known cause
fn classify_submission_error(chain_id: u64, error: EngineError) -> EngineError {
    let message = match &error {
        EngineError::Provider { message, .. } | EngineError::Relay { message, .. } => message,
        _ => return error,
    };

    if message.contains("nonce too low") {
        return EngineError::StaleNonce { chain_id };
    }
    if message.contains("insufficient funds") {
        return EngineError::InsufficientFunds { chain_id };
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::orders::{OrderUpdate, SignedOrder};
    use crate::signer::MockTransactionSigner;
    use crate::store::MemoryStore;
    use crate::swap::SwapPlan;
    use crate::txn::{AccountMeta, Routing, TransactionStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use ethers::types::{Address, Bytes, TransactionReceipt, U256, U64};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        chain_id: u64,
        pending: u64,
        receipts: Mutex<VecDeque<Option<TransactionReceipt>>>,
        sent: Mutex<Vec<Bytes>>,
    }

    impl ScriptedClient {
        fn new(chain_id: u64, pending: u64) -> Self {
            Self {
                chain_id,
                pending,
                receipts: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn script_receipt(&self, receipt: Option<TransactionReceipt>) {
            self.receipts.lock().unwrap().push_back(receipt);
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedClient {
        fn chain_id(&self) -> u64 {
            self.chain_id
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> EngineResult<H256> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(raw);
            Ok(H256::from_low_u64_be(sent.len() as u64))
        }

        async fn transaction_receipt(
            &self,
            _hash: H256,
        ) -> EngineResult<Option<TransactionReceipt>> {
            Ok(self
                .receipts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(None))
        }

        async fn pending_transaction_count(&self, _address: Address) -> EngineResult<u64> {
            Ok(self.pending)
        }

        async fn latest_transaction_count(&self, _address: Address) -> EngineResult<u64> {
            Ok(self.pending)
        }
    }

    struct NullOrderService;

    #[async_trait]
    impl OrderService for NullOrderService {
        async fn submit_order(&self, _order: &SignedOrder) -> EngineResult<()> {
            Ok(())
        }

        async fn order_status(&self, _order_hash: H256) -> EngineResult<OrderUpdate> {
            Err(EngineError::OrderService("not scripted".to_string()))
        }

        async fn update_plan(&self, _update: &PlanUpdate) -> EngineResult<()> {
            Ok(())
        }
    }

    fn mined_receipt(ok: bool) -> TransactionReceipt {
        TransactionReceipt {
            block_number: Some(U64::from(100)),
            block_hash: Some(H256::repeat_byte(0xbb)),
            status: Some(U64::from(if ok { 1 } else { 0 })),
            gas_used: Some(U256::from(21000)),
            effective_gas_price: Some(U256::from(30_000_000_000u64)),
            ..Default::default()
        }
    }

    fn trade() -> TradeSummary {
        TradeSummary {
            input: Address::repeat_byte(2),
            output: Address::repeat_byte(3),
            input_amount: U256::from(1000),
            min_output_amount: U256::from(990),
            quote_id: "quote-1".to_string(),
        }
    }

    fn context(chain_id: u64) -> SwapContext {
        SwapContext {
            account: AccountMeta::signer(Address::repeat_byte(1)),
            chain_id,
            routing: Routing::Classic,
            trade: trade(),
            plan: SwapPlan::new(vec![]),
            deadline: Utc::now() + chrono::Duration::minutes(5),
            private_relay: false,
        }
    }

    fn executor(
        client: Arc<ScriptedClient>,
        store: Arc<MemoryStore>,
        signed_nonces: Arc<Mutex<Vec<Option<U256>>>>,
        config: EngineConfig,
    ) -> StepExecutor {
        let registry = Arc::new(ChainRegistry::new());
        registry.register_provider(client);

        let mut signer = MockTransactionSigner::new();
        signer
            .expect_address()
            .return_const(Address::repeat_byte(1));
        signer.expect_sign_transaction().returning(move |tx| {
            signed_nonces.lock().unwrap().push(tx.nonce().cloned());
            Ok(Bytes::from(vec![0x01]))
        });

        let config = Arc::new(config);
        let nonces = Arc::new(NonceResolver::new(
            registry.clone(),
            store.clone(),
            config.clone(),
        ));

        StepExecutor::new(
            registry,
            store,
            Arc::new(signer),
            nonces,
            Arc::new(NullOrderService),
            config,
        )
    }

    #[tokio::test]
    async fn nonce_cursor_advances_without_re_resolving() {
        let client = Arc::new(ScriptedClient::new(1, 5));
        let store = Arc::new(MemoryStore::new());
        let signed = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(
            client.clone(),
            store.clone(),
            signed.clone(),
            EngineConfig::default(),
        );

        let ctx = context(1);
        let mut run = PlanRun::new(&ctx, false);

        let first = SwapStep::Wrap {
            request: TypedTransaction::default(),
            amount: U256::from(10),
        };
        let second = SwapStep::SwapSubmission {
            request: TypedTransaction::default(),
        };

        executor.execute_step(&mut run, &first).await.unwrap();
        executor.execute_step(&mut run, &second).await.unwrap();

        // Provider pending count stays at 5 the whole time; the second
        // submission must come from the local cursor, not a fresh resolve
        let signed = signed.lock().unwrap();
        assert_eq!(
            signed.as_slice(),
            &[Some(U256::from(5)), Some(U256::from(6))]
        );

        let incomplete = store.incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 2);
        assert!(incomplete.iter().all(|tx| tx.hash.is_some()));
        assert!(incomplete
            .iter()
            .all(|tx| tx.status == TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn required_approval_blocks_until_mined() {
        let client = Arc::new(ScriptedClient::new(1, 0));
        client.script_receipt(None);
        client.script_receipt(Some(mined_receipt(true)));

        let store = Arc::new(MemoryStore::new());
        let signed = Arc::new(Mutex::new(Vec::new()));
        let mut config = EngineConfig::default();
        config.executor.receipt_poll_interval_ms = 10;
        let executor = executor(client.clone(), store.clone(), signed, config);

        let ctx = context(1);
        let mut run = PlanRun::new(&ctx, false);
        let step = SwapStep::Approval {
            request: TypedTransaction::default(),
            token: Address::repeat_byte(2),
            spender: Address::repeat_byte(9),
            amount: U256::from(1000),
            wait_for_receipt: true,
        };

        let outcome = executor.execute_step(&mut run, &step).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Confirmed(_)));
    }

    #[tokio::test]
    async fn reverted_approval_stops_the_plan() {
        let client = Arc::new(ScriptedClient::new(1, 0));
        client.script_receipt(Some(mined_receipt(false)));

        let store = Arc::new(MemoryStore::new());
        let signed = Arc::new(Mutex::new(Vec::new()));
        let mut config = EngineConfig::default();
        config.executor.receipt_poll_interval_ms = 10;
        let executor = executor(client.clone(), store.clone(), signed, config);

        let ctx = context(1);
        let mut run = PlanRun::new(&ctx, false);
        let step = SwapStep::Approval {
            request: TypedTransaction::default(),
            token: Address::repeat_byte(2),
            spender: Address::repeat_byte(9),
            amount: U256::from(1000),
            wait_for_receipt: true,
        };

        let err = executor.execute_step(&mut run, &step).await.unwrap_err();
        assert!(matches!(err, EngineError::Submission { .. }));
    }

    #[tokio::test]
    async fn chain_config_can_force_approval_waits() {
        let client = Arc::new(ScriptedClient::new(1, 0));
        client.script_receipt(Some(mined_receipt(true)));

        let store = Arc::new(MemoryStore::new());
        let signed = Arc::new(Mutex::new(Vec::new()));
        let mut config = EngineConfig::default();
        config.executor.receipt_poll_interval_ms = 10;
        config.chains.insert(
            "test".to_string(),
            ChainConfig {
                chain_id: 1,
                name: "test".to_string(),
                enabled: true,
                private_relay_supported: false,
                approval_wait_for_receipt: true,
            },
        );
        let executor = executor(client.clone(), store.clone(), signed, config);

        let ctx = context(1);
        let mut run = PlanRun::new(&ctx, false);
        let step = SwapStep::Approval {
            request: TypedTransaction::default(),
            token: Address::repeat_byte(2),
            spender: Address::repeat_byte(9),
            amount: U256::from(1000),
            // Step itself does not ask to wait; chain config does
            wait_for_receipt: false,
        };

        let outcome = executor.execute_step(&mut run, &step).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Confirmed(_)));
    }
}
