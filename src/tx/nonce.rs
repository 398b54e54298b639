//! Nonce resolution for mixed public and private submission paths
//!
//! Handles:
//! - Fresh per-plan resolution from the provider's pending count
//! - Accounting for private-relay transactions the public mempool cannot see
//! - Graceful degradation when resolution fails

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::ChainRegistry;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::metrics;
use crate::store::TransactionStore;

/// Outcome of one nonce resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedNonce {
    /// Next usable nonce for the account
    pub nonce: u64,
    /// Local private-relay submissions folded into the nonce, when the
    /// public mempool was the source
    pub pending_private_count: Option<u64>,
}

/// Resolves the next usable nonce for an account on a chain
pub struct NonceResolver {
    registry: Arc<ChainRegistry>,
    store: Arc<dyn TransactionStore>,
    config: Arc<EngineConfig>,
}

impl NonceResolver {
    pub fn new(
        registry: Arc<ChainRegistry>,
        store: Arc<dyn TransactionStore>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    /// Whether submissions on this chain should go through the private relay
    pub fn use_private_relay(&self, chain_id: u64) -> bool {
        self.config.private_relay_supported(chain_id) && self.registry.relay(chain_id).is_some()
    }

    /// Resolve the next nonce, or None when resolution fails
    ///
    /// Failure is not fatal: the caller submits without an explicit nonce
    /// and the signer's provider assigns one.
    pub async fn resolve(&self, account: Address, chain_id: u64) -> Option<ResolvedNonce> {
        match self.try_resolve(account, chain_id).await {
            Ok(resolved) => {
                debug!(
                    "Resolved nonce {} for {:?} on chain {} (private pending: {:?})",
                    resolved.nonce, account, chain_id, resolved.pending_private_count
                );
                Some(resolved)
            }
            Err(e) => {
                warn!(
                    "Nonce resolution failed for {:?} on chain {}: {}",
                    account, chain_id, e
                );
                metrics::record_nonce_degraded(chain_id);
                None
            }
        }
    }

    async fn try_resolve(&self, account: Address, chain_id: u64) -> EngineResult<ResolvedNonce> {
        if self.use_private_relay(chain_id) {
            if let Some(relay) = self.registry.relay(chain_id) {
                // The relay sees its own private queue, so its pending
                // count already includes what the public mempool misses
                let nonce = relay.pending_transaction_count(account).await?;
                metrics::record_nonce_resolved(chain_id, "private_relay");
                return Ok(ResolvedNonce {
                    nonce,
                    pending_private_count: None,
                });
            }
        }

        let provider = self.registry.provider(chain_id)?;
        let nonce = provider.pending_transaction_count(account).await?;
        metrics::record_nonce_resolved(chain_id, "public");

        if !self.config.private_relay_supported(chain_id) {
            return Ok(ResolvedNonce {
                nonce,
                pending_private_count: None,
            });
        }

        // Submitting publicly on a chain where this wallet also uses a
        // relay: private transactions are invisible to the public mempool
        // and must be counted on top
        let private_pending = self.store.pending_private_count(account, chain_id).await?;
        Ok(ResolvedNonce {
            nonce: nonce + private_pending,
            pending_private_count: Some(private_pending),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClient;
    use crate::config::ChainConfig;
    use crate::error::EngineError;
    use crate::store::MemoryStore;
    use crate::txn::{TransactionDetails, TypeInfo};
    use async_trait::async_trait;
    use ethers::types::{Bytes, TransactionReceipt, H256, U256};

    struct StaticClient {
        chain_id: u64,
        pending: u64,
    }

    #[async_trait]
    impl ChainClient for StaticClient {
        fn chain_id(&self) -> u64 {
            self.chain_id
        }

        async fn send_raw_transaction(&self, _raw: Bytes) -> EngineResult<H256> {
            Ok(H256::zero())
        }

        async fn transaction_receipt(
            &self,
            _hash: H256,
        ) -> EngineResult<Option<TransactionReceipt>> {
            Ok(None)
        }

        async fn pending_transaction_count(&self, _address: Address) -> EngineResult<u64> {
            Ok(self.pending)
        }

        async fn latest_transaction_count(&self, _address: Address) -> EngineResult<u64> {
            Ok(self.pending)
        }
    }

    struct FailingClient;

    #[async_trait]
    impl ChainClient for FailingClient {
        fn chain_id(&self) -> u64 {
            1
        }

        async fn send_raw_transaction(&self, _raw: Bytes) -> EngineResult<H256> {
            Err(EngineError::Provider {
                chain_id: 1,
                message: "down".to_string(),
            })
        }

        async fn transaction_receipt(
            &self,
            _hash: H256,
        ) -> EngineResult<Option<TransactionReceipt>> {
            Err(EngineError::Provider {
                chain_id: 1,
                message: "down".to_string(),
            })
        }

        async fn pending_transaction_count(&self, _address: Address) -> EngineResult<u64> {
            Err(EngineError::Provider {
                chain_id: 1,
                message: "down".to_string(),
            })
        }

        async fn latest_transaction_count(&self, _address: Address) -> EngineResult<u64> {
            Err(EngineError::Provider {
                chain_id: 1,
                message: "down".to_string(),
            })
        }
    }

    fn config_with_chain(chain_id: u64, private_relay_supported: bool) -> Arc<EngineConfig> {
        let mut config = EngineConfig::default();
        config.chains.insert(
            "test".to_string(),
            ChainConfig {
                chain_id,
                name: "test".to_string(),
                enabled: true,
                private_relay_supported,
                approval_wait_for_receipt: false,
            },
        );
        Arc::new(config)
    }

    async fn seed_private_pending(store: &MemoryStore, account: Address, chain_id: u64, n: u64) {
        for _ in 0..n {
            let mut tx = TransactionDetails::new_classic(
                chain_id,
                account,
                TypeInfo::Wrap {
                    amount: U256::from(1),
                },
            );
            tx.private_relay = true;
            store.upsert(tx).await.unwrap();
        }
    }

    #[tokio::test]
    async fn public_count_plus_local_private_pending() {
        let registry = Arc::new(ChainRegistry::new());
        registry.register_provider(Arc::new(StaticClient {
            chain_id: 1,
            pending: 5,
        }));

        let store = Arc::new(MemoryStore::new());
        let account = Address::repeat_byte(1);
        seed_private_pending(&store, account, 1, 3).await;

        let resolver = NonceResolver::new(registry, store, config_with_chain(1, true));
        let resolved = resolver.resolve(account, 1).await.unwrap();
        assert_eq!(resolved.nonce, 8);
        assert_eq!(resolved.pending_private_count, Some(3));
    }

    #[tokio::test]
    async fn unsupported_chain_uses_public_count_alone() {
        let registry = Arc::new(ChainRegistry::new());
        registry.register_provider(Arc::new(StaticClient {
            chain_id: 10,
            pending: 5,
        }));

        let store = Arc::new(MemoryStore::new());
        let account = Address::repeat_byte(1);
        seed_private_pending(&store, account, 10, 3).await;

        let resolver = NonceResolver::new(registry, store, config_with_chain(10, false));
        let resolved = resolver.resolve(account, 10).await.unwrap();
        assert_eq!(resolved.nonce, 5);
        assert_eq!(resolved.pending_private_count, None);
    }

    #[tokio::test]
    async fn registered_relay_supplies_the_count_directly() {
        let registry = Arc::new(ChainRegistry::new());
        registry.register_provider(Arc::new(StaticClient {
            chain_id: 1,
            pending: 5,
        }));
        registry.register_relay(Arc::new(StaticClient {
            chain_id: 1,
            pending: 9,
        }));

        let store = Arc::new(MemoryStore::new());
        let resolver = NonceResolver::new(registry, store, config_with_chain(1, true));
        assert!(resolver.use_private_relay(1));

        let resolved = resolver.resolve(Address::repeat_byte(1), 1).await.unwrap();
        assert_eq!(resolved.nonce, 9);
        assert_eq!(resolved.pending_private_count, None);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_none() {
        let registry = Arc::new(ChainRegistry::new());
        registry.register_provider(Arc::new(FailingClient));

        let store = Arc::new(MemoryStore::new());
        let resolver = NonceResolver::new(registry, store, config_with_chain(1, true));
        assert!(resolver.resolve(Address::repeat_byte(1), 1).await.is_none());
    }
}
