//! Watcher supervision
//!
//! Subscribes to store events and keeps exactly one watcher task alive per
//! incomplete transaction. On startup it reconciles persisted state first:
//! incomplete records get their watchers back, except signed orders that
//! never reached the order service, which are marked as stranded by the
//! app closing and left unwatched.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chain::ChainRegistry;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::orders::OrderService;
use crate::store::TransactionStore;
use crate::txn::{QueueStatus, TransactionDetails};
use crate::watcher::{OnChainWatcher, OrderWatcher};

/// Fans incomplete transactions out to per-transaction watcher tasks
pub struct WatcherSupervisor {
    store: Arc<dyn TransactionStore>,
    onchain: Arc<OnChainWatcher>,
    orders: Arc<OrderWatcher>,
    notifier: Arc<dyn Notifier>,
    config: Arc<EngineConfig>,
    active: DashMap<Uuid, JoinHandle<()>>,
    shutdown: Arc<RwLock<bool>>,
}

impl WatcherSupervisor {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        registry: Arc<ChainRegistry>,
        order_service: Arc<dyn OrderService>,
        notifier: Arc<dyn Notifier>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let onchain = Arc::new(OnChainWatcher::new(
            store.clone(),
            registry.clone(),
            notifier.clone(),
            config.clone(),
        ));
        let orders = Arc::new(OrderWatcher::new(
            store.clone(),
            order_service,
            registry,
            notifier.clone(),
            config.clone(),
        ));

        Self {
            store,
            onchain,
            orders,
            notifier,
            config,
            active: DashMap::new(),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Reconcile persisted state, then watch the store's event feed
    pub async fn run(&self) -> EngineResult<()> {
        info!("Watcher supervisor starting");

        // Reconcile before subscribing: stranded-order flips done here must
        // not loop back through the feed and spawn watchers
        self.reconcile_startup().await?;

        let mut events = self.store.subscribe();
        let mut prune =
            tokio::time::interval(Duration::from_secs(self.config.watcher.prune_interval_secs));

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                event = events.recv() => match event {
                    Ok(tx) => self.maybe_spawn(tx),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Watcher supervisor lagged behind {} store events", missed);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = prune.tick() => self.prune_finished(),
            }
        }

        info!("Watcher supervisor stopped");
        Ok(())
    }

    /// Resume watching everything that was incomplete at shutdown
    async fn reconcile_startup(&self) -> EngineResult<()> {
        let incomplete = self.store.incomplete().await?;
        info!("Reconciling {} incomplete transactions", incomplete.len());

        for tx in incomplete {
            if tx.is_order() && tx.queue_status == Some(QueueStatus::Waiting) {
                // Signed but never handed to the order service before the
                // app closed; there is nothing on the wire to watch
                info!("Order {} stranded by app close, not watching", tx.id);
                let mut stranded = tx;
                stranded.queue_status = Some(QueueStatus::AppClosed);
                self.store.upsert(stranded).await?;
                continue;
            }
            self.maybe_spawn(tx);
        }

        Ok(())
    }

    /// Spawn a watcher unless one is already running for this record
    fn maybe_spawn(&self, tx: TransactionDetails) {
        if tx.is_final() {
            return;
        }
        if tx.is_order() && tx.queue_status == Some(QueueStatus::AppClosed) {
            return;
        }
        if !tx.is_order() && tx.hash.is_none() {
            debug!("Transaction {} has no hash yet, nothing to watch", tx.id);
            return;
        }

        match self.active.entry(tx.id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_finished() {
                    return;
                }
                let handle = self.spawn_watcher(tx);
                entry.insert(handle);
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_watcher(tx);
                entry.insert(handle);
            }
        }

        metrics::set_active_watchers(self.active.len());
    }

    fn spawn_watcher(&self, tx: TransactionDetails) -> JoinHandle<()> {
        debug!(
            "Spawning {} watcher for transaction {}",
            if tx.is_order() { "order" } else { "receipt" },
            tx.id
        );

        let onchain = self.onchain.clone();
        let orders = self.orders.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let id = tx.id;
            let from = tx.from;
            let chain_id = tx.chain_id;
            let is_order = tx.is_order();

            let result = if is_order {
                orders.watch(tx).await
            } else {
                onchain.watch(tx).await
            };

            if let Err(e) = result {
                error!("Watcher for transaction {} gave up: {}", id, e);
                metrics::record_watcher_error(chain_id);
                notifier
                    .push(Notification::WatcherFailed { address: from, id })
                    .await;
            }
        })
    }

    fn prune_finished(&self) {
        self.active.retain(|_, handle| !handle.is_finished());
        metrics::set_active_watchers(self.active.len());
    }

    /// Watcher tasks still running
    pub fn active_count(&self) -> usize {
        self.active
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Stop the supervisor loop and abort running watchers
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        for entry in self.active.iter() {
            entry.value().abort();
        }
        info!("Watcher supervisor shutdown requested");
    }
}
