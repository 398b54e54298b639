//! Wallet transaction lifecycle engine
//!
//! Executes multi-step swap plans (wrap, approval, permit, swap or order
//! submission), watches every broadcast transaction and signed order to a
//! final status, and reconciles persisted state across app restarts. The
//! engine embeds in a host wallet: the host supplies chain clients, a
//! signer, an order service, and a notification sink, and consumes the
//! transaction store's event feed to drive its UI.
//!
//! Typical wiring:
//!
//! ```ignore
//! let config = EngineConfig::load()?;
//! let registry = Arc::new(ChainRegistry::new());
//! registry.register_provider(mainnet_client);
//!
//! let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
//! let engine = WalletEngine::new(config, registry, store, signer, orders, notifier);
//! let _watchers = engine.start();
//!
//! match prepare(request)? {
//!     PrepareOutcome::Ready(ctx) => {
//!         engine.swaps().execute(ctx, callbacks, CancelFlag::new()).await?
//!     }
//!     PrepareOutcome::Blocked(warnings) => show(warnings),
//! }
//! ```

use std::sync::Arc;
use tracing::{error, info};

pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod orders;
pub mod retry;
pub mod signer;
pub mod store;
pub mod swap;
pub mod tx;
pub mod txn;
pub mod watcher;

pub use chain::{ChainClient, ChainRegistry};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use notify::{Notification, Notifier};
pub use orders::{OrderService, OrderUpdate, RemoteOrderStatus, SignedOrder};
pub use signer::TransactionSigner;
pub use store::{MemoryStore, TransactionStore};
pub use swap::{
    prepare, CancelFlag, ExecuteSwapService, PrepareOutcome, PrepareRequest, SwapCallbacks,
    SwapContext,
};
pub use txn::{QueueStatus, Routing, TransactionDetails, TransactionStatus};
pub use watcher::WatcherSupervisor;

use tx::{NonceResolver, StepExecutor};

/// Fully wired engine: swap execution plus watcher supervision
///
/// Construction wires the services together; nothing runs until
/// [`WalletEngine::start`] launches the watcher supervisor.
pub struct WalletEngine {
    config: Arc<EngineConfig>,
    registry: Arc<ChainRegistry>,
    store: Arc<dyn TransactionStore>,
    swaps: Arc<ExecuteSwapService>,
    supervisor: Arc<WatcherSupervisor>,
}

impl WalletEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<ChainRegistry>,
        store: Arc<dyn TransactionStore>,
        signer: Arc<dyn TransactionSigner>,
        orders: Arc<dyn OrderService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let config = Arc::new(config);

        let nonces = Arc::new(NonceResolver::new(
            registry.clone(),
            store.clone(),
            config.clone(),
        ));
        let executor = Arc::new(StepExecutor::new(
            registry.clone(),
            store.clone(),
            signer,
            nonces,
            orders.clone(),
            config.clone(),
        ));
        let swaps = Arc::new(ExecuteSwapService::new(
            executor,
            store.clone(),
            orders.clone(),
            notifier.clone(),
            config.clone(),
        ));
        let supervisor = Arc::new(WatcherSupervisor::new(
            store.clone(),
            registry.clone(),
            orders,
            notifier,
            config.clone(),
        ));

        info!(
            "Wallet engine wired for {} configured chains",
            config.enabled_chains().len()
        );

        Self {
            config,
            registry,
            store,
            swaps,
            supervisor,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ChainRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> Arc<dyn TransactionStore> {
        self.store.clone()
    }

    pub fn swaps(&self) -> Arc<ExecuteSwapService> {
        self.swaps.clone()
    }

    pub fn supervisor(&self) -> Arc<WatcherSupervisor> {
        self.supervisor.clone()
    }

    /// Launch the watcher supervisor
    ///
    /// Reconciles persisted state first (respawning watchers, flagging
    /// orders stranded by the previous shutdown), then follows the store's
    /// event feed. The handle finishes when the supervisor stops.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let supervisor = self.supervisor.clone();
        tokio::spawn(async move {
            if let Err(e) = supervisor.run().await {
                error!("Watcher supervisor error: {}", e);
            }
        })
    }

    /// Stop the supervisor loop and abort running watchers
    pub async fn stop(&self) {
        self.supervisor.stop().await;
        info!("Wallet engine stopped");
    }
}
