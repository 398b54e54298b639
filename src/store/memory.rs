//! In-memory transaction store

use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::store::TransactionStore;
use crate::txn::{TransactionDetails, TransactionStatus};

/// Keeps all records in process memory
pub struct MemoryStore {
    transactions: RwLock<HashMap<Uuid, TransactionDetails>>,
    event_tx: broadcast::Sender<TransactionDetails>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(10000);
        Self {
            transactions: RwLock::new(HashMap::new()),
            event_tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn get(&self, id: Uuid) -> EngineResult<Option<TransactionDetails>> {
        Ok(self.transactions.read().await.get(&id).cloned())
    }

    async fn upsert(&self, tx: TransactionDetails) -> EngineResult<TransactionDetails> {
        {
            let mut transactions = self.transactions.write().await;
            if let Some(existing) = transactions.get(&tx.id) {
                if existing.is_final() {
                    debug!(
                        "Ignoring write to finalized transaction {} ({:?})",
                        tx.id, existing.status
                    );
                    return Ok(existing.clone());
                }
            }
            transactions.insert(tx.id, tx.clone());
        }

        // No subscribers is fine, e.g. before the supervisor starts
        let _ = self.event_tx.send(tx.clone());
        Ok(tx)
    }

    async fn incomplete(&self) -> EngineResult<Vec<TransactionDetails>> {
        let transactions = self.transactions.read().await;
        let mut incomplete: Vec<TransactionDetails> = transactions
            .values()
            .filter(|tx| !tx.is_final())
            .cloned()
            .collect();
        incomplete.sort_by_key(|tx| tx.added_time);
        Ok(incomplete)
    }

    async fn pending_private_count(&self, from: Address, chain_id: u64) -> EngineResult<u64> {
        let transactions = self.transactions.read().await;
        let count = transactions
            .values()
            .filter(|tx| {
                tx.from == from
                    && tx.chain_id == chain_id
                    && tx.private_relay
                    && tx.status == TransactionStatus::Pending
            })
            .count();
        Ok(count as u64)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransactionDetails> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::TypeInfo;
    use ethers::types::U256;
    use tokio_test::assert_ok;

    fn sample_tx(chain_id: u64, from: Address) -> TransactionDetails {
        TransactionDetails::new_classic(
            chain_id,
            from,
            TypeInfo::Wrap {
                amount: U256::from(100),
            },
        )
    }

    #[tokio::test]
    async fn upsert_stores_and_emits() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        let tx = sample_tx(1, Address::repeat_byte(1));
        let stored = assert_ok!(store.upsert(tx.clone()).await);
        assert_eq!(stored, tx);

        let event = events.try_recv().unwrap();
        assert_eq!(event.id, tx.id);
    }

    #[tokio::test]
    async fn finalized_records_ignore_later_writes() {
        let store = MemoryStore::new();

        let mut tx = sample_tx(1, Address::repeat_byte(1));
        tx.status = TransactionStatus::Success;
        assert_ok!(store.upsert(tx.clone()).await);

        let mut events = store.subscribe();
        let mut stale = tx.clone();
        stale.status = TransactionStatus::Pending;
        let stored = assert_ok!(store.upsert(stale).await);

        assert_eq!(stored.status, TransactionStatus::Success);
        assert!(events.try_recv().is_err());
        let fetched = store.get(tx.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn incomplete_skips_finalized_records() {
        let store = MemoryStore::new();

        let pending = sample_tx(1, Address::repeat_byte(1));
        assert_ok!(store.upsert(pending.clone()).await);

        let mut done = sample_tx(1, Address::repeat_byte(1));
        done.status = TransactionStatus::Failed;
        assert_ok!(store.upsert(done).await);

        let mut resting = sample_tx(1, Address::repeat_byte(1));
        resting.status = TransactionStatus::InsufficientFunds;
        assert_ok!(store.upsert(resting.clone()).await);

        let incomplete = store.incomplete().await.unwrap();
        let ids: Vec<Uuid> = incomplete.iter().map(|tx| tx.id).collect();
        assert_eq!(incomplete.len(), 2);
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&resting.id));
    }

    #[tokio::test]
    async fn private_pending_count_filters_by_account_and_chain() {
        let store = MemoryStore::new();
        let account = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);

        let mut private_tx = sample_tx(1, account);
        private_tx.private_relay = true;
        assert_ok!(store.upsert(private_tx).await);

        let mut second = sample_tx(1, account);
        second.private_relay = true;
        assert_ok!(store.upsert(second).await);

        // Wrong account, wrong chain, public path, finalized: none count
        let mut wrong_account = sample_tx(1, other);
        wrong_account.private_relay = true;
        assert_ok!(store.upsert(wrong_account).await);

        let mut wrong_chain = sample_tx(10, account);
        wrong_chain.private_relay = true;
        assert_ok!(store.upsert(wrong_chain).await);

        assert_ok!(store.upsert(sample_tx(1, account)).await);

        let mut confirmed = sample_tx(1, account);
        confirmed.private_relay = true;
        confirmed.status = TransactionStatus::Success;
        assert_ok!(store.upsert(confirmed).await);

        let count = store.pending_private_count(account, 1).await.unwrap();
        assert_eq!(count, 2);
    }
}
