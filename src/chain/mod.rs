//! Chain module - public providers and private relay endpoints
//!
//! This module provides:
//! - A registry of chain clients shared by the executor and watchers
//! - A distinct relay slot per chain for private submission paths
//! - Receipt polling for steps that must land before the next goes out

pub mod client;

pub use client::{wait_for_receipt, ChainClient};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Registered chain clients, indexed by chain ID
pub struct ChainRegistry {
    /// Public providers indexed by chain ID
    providers: DashMap<u64, Arc<dyn ChainClient>>,
    /// Private relay endpoints indexed by chain ID
    relays: DashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            relays: DashMap::new(),
        }
    }

    /// Register the public provider for a chain
    pub fn register_provider(&self, client: Arc<dyn ChainClient>) {
        let chain_id = client.chain_id();
        info!("Registered provider for chain {}", chain_id);
        self.providers.insert(chain_id, client);
    }

    /// Register a private relay endpoint for a chain
    pub fn register_relay(&self, client: Arc<dyn ChainClient>) {
        let chain_id = client.chain_id();
        info!("Registered private relay for chain {}", chain_id);
        self.relays.insert(chain_id, client);
    }

    /// Get the public provider for a specific chain
    pub fn provider(&self, chain_id: u64) -> EngineResult<Arc<dyn ChainClient>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(EngineError::ChainNotFound { chain_id })
    }

    /// Get the private relay for a specific chain, if one was registered
    pub fn relay(&self, chain_id: u64) -> Option<Arc<dyn ChainClient>> {
        self.relays.get(&chain_id).map(|r| r.clone())
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.providers.iter().map(|e| *e.key()).collect()
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}
