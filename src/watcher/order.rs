//! Off-chain order watcher
//!
//! Polls the order service for status and mirrors it onto the local
//! record. A filled order carries the settlement transaction hash, which
//! replaces the record's hash so explorers link to the fill; the receipt
//! is fetched best-effort for block details. Resting states (open,
//! insufficient funds, unverified) keep the watcher polling.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::ChainRegistry;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::orders::OrderService;
use crate::store::TransactionStore;
use crate::txn::{TransactionDetails, TransactionStatus, TxReceipt};

/// Watches signed orders until the order service reports a final status
pub struct OrderWatcher {
    store: Arc<dyn TransactionStore>,
    orders: Arc<dyn OrderService>,
    registry: Arc<ChainRegistry>,
    notifier: Arc<dyn Notifier>,
    config: Arc<EngineConfig>,
}

impl OrderWatcher {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        orders: Arc<dyn OrderService>,
        registry: Arc<ChainRegistry>,
        notifier: Arc<dyn Notifier>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            orders,
            registry,
            notifier,
            config,
        }
    }

    /// Watch one order to a final status
    pub async fn watch(&self, tx: TransactionDetails) -> EngineResult<()> {
        let Some(order_hash) = tx.order_hash else {
            return Err(EngineError::Internal(format!(
                "transaction {} has no order hash to watch",
                tx.id
            )));
        };

        let poll = Duration::from_millis(self.config.watcher.order_poll_interval_ms);
        debug!(
            "Watching order {} ({:?}) on chain {}",
            tx.id, order_hash, tx.chain_id
        );

        let mut current = tx.clone();

        loop {
            // Re-read so queue status flips from the submission path are
            // not clobbered by our next write
            if let Some(stored) = self.store.get(tx.id).await? {
                if stored.is_final() {
                    debug!("Order {} already finalized ({:?})", tx.id, stored.status);
                    return Ok(());
                }
                current = stored;
            }

            match self.orders.order_status(order_hash).await {
                Ok(update) => {
                    let status = update.status.to_transaction_status();
                    let settlement_changed =
                        update.settlement_hash.is_some() && update.settlement_hash != current.hash;

                    if status != current.status || settlement_changed {
                        let mut updated = current.clone();
                        updated.status = status;
                        if let Some(settlement) = update.settlement_hash {
                            updated.hash = Some(settlement);
                            if status == TransactionStatus::Success {
                                updated.receipt = self.fetch_receipt(tx.chain_id, settlement).await;
                            }
                        }
                        current = self.store.upsert(updated).await?;
                    }

                    if status.is_final() {
                        return self.finalize(&current).await;
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!("Order status poll failed for {}: {}", tx.id, e);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(poll).await;
        }
    }

    /// Block details for a settlement fill, if the chain will give them up
    async fn fetch_receipt(
        &self,
        chain_id: u64,
        settlement: ethers::types::H256,
    ) -> Option<TxReceipt> {
        let client = match self.registry.provider(chain_id) {
            Ok(client) => client,
            Err(_) => return None,
        };
        match client.transaction_receipt(settlement).await {
            Ok(Some(receipt)) => TxReceipt::from_ethers(&receipt),
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Settlement receipt fetch failed for {:?} on chain {}: {}",
                    settlement, chain_id, e
                );
                None
            }
        }
    }

    async fn finalize(&self, tx: &TransactionDetails) -> EngineResult<()> {
        info!(
            "Order {} settled: {:?} (settlement {:?})",
            tx.id, tx.status, tx.hash
        );

        let latency_secs = tx
            .receipt
            .as_ref()
            .map(|r| (r.confirmed_time - tx.added_time).num_milliseconds().max(0) as f64 / 1000.0);

        metrics::record_tx_finalized(tx.chain_id, &format!("{:?}", tx.status).to_lowercase());
        if let Some(latency) = latency_secs {
            metrics::record_tx_latency(tx.chain_id, latency);
        }

        self.notifier
            .push(Notification::TransactionFinalized {
                address: tx.from,
                id: tx.id,
                status: tx.status,
            })
            .await;

        Ok(())
    }
}
