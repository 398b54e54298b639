//! PostgreSQL transaction store

use async_trait::async_trait;
use ethers::types::{Address, H256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::TransactionStore;
use crate::txn::{QueueStatus, Routing, TransactionDetails, TransactionStatus};

/// Persists records across restarts
///
/// Change events are process-local: each store instance broadcasts only the
/// writes that went through it.
pub struct PostgresStore {
    pool: PgPool,
    event_tx: broadcast::Sender<TransactionDetails>,
}

impl PostgresStore {
    /// Connect and run migrations
    pub async fn new(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(EngineError::Database)?;

        let (event_tx, _) = broadcast::channel(10000);
        let store = Self { pool, event_tx };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id UUID PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                from_address VARCHAR(42) NOT NULL,
                routing VARCHAR(16) NOT NULL,
                type_info JSONB NOT NULL,
                status VARCHAR(24) NOT NULL,
                queue_status VARCHAR(24),
                tx_hash VARCHAR(66),
                order_hash VARCHAR(66),
                nonce BIGINT,
                private_relay BOOLEAN NOT NULL DEFAULT FALSE,
                receipt JSONB,
                added_time TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_txs_account
            ON wallet_transactions (from_address, chain_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_txs_status
            ON wallet_transactions (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(EngineError::Database)?;
        Ok(())
    }

    async fn write_row(&self, tx: &TransactionDetails) -> EngineResult<()> {
        let type_info = serde_json::to_value(&tx.type_info)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let receipt = tx
            .receipt
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO wallet_transactions
                (id, chain_id, from_address, routing, type_info, status, queue_status,
                 tx_hash, order_hash, nonce, private_relay, receipt, added_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id)
            DO UPDATE SET
                status = $6,
                queue_status = $7,
                tx_hash = $8,
                order_hash = $9,
                nonce = $10,
                private_relay = $11,
                receipt = $12,
                updated_at = NOW()
            "#,
        )
        .bind(tx.id)
        .bind(tx.chain_id as i64)
        .bind(format!("{:?}", tx.from))
        .bind(routing_to_str(tx.routing))
        .bind(type_info)
        .bind(status_to_str(tx.status))
        .bind(tx.queue_status.map(queue_to_str))
        .bind(tx.hash.map(|h| format!("{:?}", h)))
        .bind(tx.order_hash.map(|h| format!("{:?}", h)))
        .bind(tx.nonce.map(|n| n as i64))
        .bind(tx.private_relay)
        .bind(receipt)
        .bind(tx.added_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn get(&self, id: Uuid) -> EngineResult<Option<TransactionDetails>> {
        let row = sqlx::query("SELECT * FROM wallet_transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_details(&r)).transpose()
    }

    async fn upsert(&self, tx: TransactionDetails) -> EngineResult<TransactionDetails> {
        // Concurrent writers for one id do not exist: the executor hands a
        // record off to exactly one watcher, so read-then-write is enough.
        if let Some(existing) = self.get(tx.id).await? {
            if existing.is_final() {
                debug!(
                    "Ignoring write to finalized transaction {} ({:?})",
                    tx.id, existing.status
                );
                return Ok(existing);
            }
        }

        self.write_row(&tx).await?;
        let _ = self.event_tx.send(tx.clone());
        Ok(tx)
    }

    async fn incomplete(&self) -> EngineResult<Vec<TransactionDetails>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM wallet_transactions
            WHERE status NOT IN ('success', 'failed', 'canceled', 'expired')
            ORDER BY added_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_details).collect()
    }

    async fn pending_private_count(&self, from: Address, chain_id: u64) -> EngineResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as pending FROM wallet_transactions
            WHERE from_address = $1 AND chain_id = $2
              AND private_relay AND status = 'pending'
            "#,
        )
        .bind(format!("{:?}", from))
        .bind(chain_id as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("pending") as u64)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransactionDetails> {
        self.event_tx.subscribe()
    }
}

fn status_to_str(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Success => "success",
        TransactionStatus::Failed => "failed",
        TransactionStatus::Canceled => "canceled",
        TransactionStatus::Expired => "expired",
        TransactionStatus::InsufficientFunds => "insufficient_funds",
        TransactionStatus::Unknown => "unknown",
    }
}

fn status_from_str(s: &str) -> TransactionStatus {
    match s {
        "pending" => TransactionStatus::Pending,
        "success" => TransactionStatus::Success,
        "failed" => TransactionStatus::Failed,
        "canceled" => TransactionStatus::Canceled,
        "expired" => TransactionStatus::Expired,
        "insufficient_funds" => TransactionStatus::InsufficientFunds,
        _ => TransactionStatus::Unknown,
    }
}

fn queue_to_str(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Waiting => "waiting",
        QueueStatus::Submitted => "submitted",
        QueueStatus::AppClosed => "app_closed",
        QueueStatus::SubmissionFailed => "submission_failed",
    }
}

fn queue_from_str(s: &str) -> Option<QueueStatus> {
    match s {
        "waiting" => Some(QueueStatus::Waiting),
        "submitted" => Some(QueueStatus::Submitted),
        "app_closed" => Some(QueueStatus::AppClosed),
        "submission_failed" => Some(QueueStatus::SubmissionFailed),
        _ => None,
    }
}

fn routing_to_str(routing: Routing) -> &'static str {
    match routing {
        Routing::Classic => "classic",
        Routing::UniswapX => "uniswap_x",
    }
}

fn routing_from_str(s: &str) -> Routing {
    match s {
        "uniswap_x" => Routing::UniswapX,
        _ => Routing::Classic,
    }
}

fn parse_address(s: &str) -> EngineResult<Address> {
    s.parse::<Address>()
        .map_err(|e| EngineError::Internal(format!("bad address in store: {e}")))
}

fn parse_hash(s: &str) -> EngineResult<H256> {
    s.parse::<H256>()
        .map_err(|e| EngineError::Internal(format!("bad hash in store: {e}")))
}

fn row_to_details(row: &PgRow) -> EngineResult<TransactionDetails> {
    let type_info: serde_json::Value = row.get("type_info");
    let type_info =
        serde_json::from_value(type_info).map_err(|e| EngineError::Internal(e.to_string()))?;

    let receipt: Option<serde_json::Value> = row.get("receipt");
    let receipt = receipt
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| EngineError::Internal(e.to_string()))?;

    let queue_status: Option<String> = row.get("queue_status");
    let tx_hash: Option<String> = row.get("tx_hash");
    let order_hash: Option<String> = row.get("order_hash");

    Ok(TransactionDetails {
        id: row.get("id"),
        chain_id: row.get::<i64, _>("chain_id") as u64,
        from: parse_address(&row.get::<String, _>("from_address"))?,
        routing: routing_from_str(&row.get::<String, _>("routing")),
        type_info,
        status: status_from_str(&row.get::<String, _>("status")),
        queue_status: queue_status.as_deref().and_then(queue_from_str),
        hash: tx_hash.as_deref().map(parse_hash).transpose()?,
        order_hash: order_hash.as_deref().map(parse_hash).transpose()?,
        nonce: row.get::<Option<i64>, _>("nonce").map(|n| n as u64),
        private_relay: row.get("private_relay"),
        receipt,
        added_time: row.get("added_time"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        let statuses = [
            TransactionStatus::Pending,
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Canceled,
            TransactionStatus::Expired,
            TransactionStatus::InsufficientFunds,
            TransactionStatus::Unknown,
        ];
        for status in statuses {
            assert_eq!(status_from_str(status_to_str(status)), status);
        }
    }

    #[test]
    fn queue_strings_round_trip() {
        let statuses = [
            QueueStatus::Waiting,
            QueueStatus::Submitted,
            QueueStatus::AppClosed,
            QueueStatus::SubmissionFailed,
        ];
        for status in statuses {
            assert_eq!(queue_from_str(queue_to_str(status)), Some(status));
        }
        assert_eq!(queue_from_str("stale"), None);
    }

    #[test]
    fn address_formatting_round_trips() {
        let address = Address::repeat_byte(0xab);
        let parsed = parse_address(&format!("{:?}", address)).unwrap();
        assert_eq!(parsed, address);

        let hash = H256::repeat_byte(0xcd);
        let parsed = parse_hash(&format!("{:?}", hash)).unwrap();
        assert_eq!(parsed, hash);
    }
}
