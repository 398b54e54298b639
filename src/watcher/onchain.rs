//! On-chain receipt watcher
//!
//! One watcher per broadcast transaction. Polls until the receipt lands,
//! then finalizes the record from it. A transaction whose nonce gets
//! consumed by a different hash was replaced or cancelled from another
//! surface; the watcher settles it as canceled after one last receipt
//! check.

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainRegistry};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::store::TransactionStore;
use crate::txn::{TransactionDetails, TransactionStatus, TxReceipt};

/// Watches broadcast transactions until they settle
pub struct OnChainWatcher {
    store: Arc<dyn TransactionStore>,
    registry: Arc<ChainRegistry>,
    notifier: Arc<dyn Notifier>,
    config: Arc<EngineConfig>,
}

impl OnChainWatcher {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        registry: Arc<ChainRegistry>,
        notifier: Arc<dyn Notifier>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            config,
        }
    }

    /// Watch one transaction to a final status
    pub async fn watch(&self, tx: TransactionDetails) -> EngineResult<()> {
        let chain_id = tx.chain_id;
        let client = self.registry.provider(chain_id)?;
        let Some(hash) = tx.hash else {
            return Err(EngineError::Internal(format!(
                "transaction {} has no hash to watch",
                tx.id
            )));
        };

        let poll = Duration::from_millis(self.config.watcher.poll_interval_ms);
        debug!(
            "Watching transaction {} ({:?}) on chain {}",
            tx.id, hash, chain_id
        );

        loop {
            // The store is authoritative; another path may have settled it
            if let Some(current) = self.store.get(tx.id).await? {
                if current.is_final() {
                    debug!(
                        "Transaction {} already finalized ({:?})",
                        tx.id, current.status
                    );
                    return Ok(());
                }
            }

            match client.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    if let Some(parsed) = TxReceipt::from_ethers(&receipt) {
                        return self.finalize(&tx, parsed).await;
                    }
                    // Receipt exists but is not in a block yet; poll again
                }
                Ok(None) => {
                    if let Some(nonce) = tx.nonce {
                        if self.nonce_consumed(&client, tx.from, nonce).await {
                            // The slot was spent by some other hash; look
                            // once more before settling on replacement
                            match client.transaction_receipt(hash).await {
                                Ok(Some(receipt)) => {
                                    if let Some(parsed) = TxReceipt::from_ethers(&receipt) {
                                        return self.finalize(&tx, parsed).await;
                                    }
                                }
                                Ok(None) => return self.mark_replaced(&tx).await,
                                Err(e) => {
                                    warn!(
                                        "Receipt re-check failed for {} on chain {}: {}",
                                        tx.id, chain_id, e
                                    );
                                }
                            }
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "Receipt poll failed for {} on chain {}: {}",
                        tx.id, chain_id, e
                    );
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(poll).await;
        }
    }

    /// Whether the account's mined nonce has moved past this transaction
    async fn nonce_consumed(
        &self,
        client: &Arc<dyn ChainClient>,
        from: Address,
        nonce: u64,
    ) -> bool {
        match client.latest_transaction_count(from).await {
            Ok(count) => count > nonce,
            Err(e) => {
                warn!("Nonce check failed for {:?}: {}", from, e);
                false
            }
        }
    }

    async fn finalize(&self, tx: &TransactionDetails, receipt: TxReceipt) -> EngineResult<()> {
        let status = if receipt.status_ok {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };

        let latency_secs =
            (receipt.confirmed_time - tx.added_time).num_milliseconds().max(0) as f64 / 1000.0;

        info!(
            "Transaction {} finalized: {:?} in block {}",
            tx.id, status, receipt.block_number
        );

        let mut updated = tx.clone();
        updated.status = status;
        updated.receipt = Some(receipt);
        self.store.upsert(updated).await?;

        metrics::record_tx_finalized(tx.chain_id, &format!("{:?}", status).to_lowercase());
        metrics::record_tx_latency(tx.chain_id, latency_secs);

        self.notifier
            .push(Notification::TransactionFinalized {
                address: tx.from,
                id: tx.id,
                status,
            })
            .await;

        Ok(())
    }

    async fn mark_replaced(&self, tx: &TransactionDetails) -> EngineResult<()> {
        warn!(
            "Transaction {} replaced: nonce {:?} consumed without hash {:?} mining",
            tx.id, tx.nonce, tx.hash
        );

        let mut updated = tx.clone();
        updated.status = TransactionStatus::Canceled;
        self.store.upsert(updated).await?;

        metrics::record_tx_finalized(tx.chain_id, "canceled");
        self.notifier
            .push(Notification::TransactionFinalized {
                address: tx.from,
                id: tx.id,
                status: TransactionStatus::Canceled,
            })
            .await;

        Ok(())
    }
}
