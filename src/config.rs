//! Configuration management for the wallet engine
//!
//! Loads configuration from TOML files with environment variable
//! substitution. Every section carries defaults so embedders can start from
//! `EngineConfig::default()` and override only what they need.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub watcher: WatcherConfig,
    pub private_relay: PrivateRelayConfig,
    pub database: Option<DatabaseConfig>,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Cap on waiting for a broadcast to be accepted
    pub broadcast_timeout_secs: u64,
    /// How often to re-check for a receipt while a step blocks on one
    pub receipt_poll_interval_ms: u64,
    /// Attempts for handing a signed order to the order service
    pub order_submit_attempts: u32,
    /// Attempts for reporting plan progress to the order service
    pub plan_update_attempts: u32,
    /// First retry waits this long; later retries scale linearly
    pub retry_base_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            broadcast_timeout_secs: 30,
            receipt_poll_interval_ms: 1000,
            order_submit_attempts: 3,
            plan_update_attempts: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Receipt poll cadence for on-chain watchers
    pub poll_interval_ms: u64,
    /// Status poll cadence for order watchers
    pub order_poll_interval_ms: u64,
    /// How often the supervisor sweeps out finished watcher handles
    pub prune_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            order_poll_interval_ms: 2000,
            prune_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrivateRelayConfig {
    /// Master switch; individual chains also need `private_relay_supported`
    pub enabled: bool,
}

impl Default for PrivateRelayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub enabled: bool,
    /// Whether a private relay exists for this chain at all
    pub private_relay_supported: bool,
    /// Hold the plan until approvals are mined before sending the swap
    pub approval_wait_for_receipt: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 0,
            name: String::new(),
            enabled: true,
            private_relay_supported: false,
            approval_wait_for_receipt: false,
        }
    }
}

impl EngineConfig {
    /// Load settings from the configured file
    pub fn load() -> EngineResult<Self> {
        let config_path = env::var("WALLET_ENGINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> EngineResult<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let config: EngineConfig = toml::from_str(&config_str)
            .map_err(|e| EngineError::Config(format!("Failed to parse configuration: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        if self.executor.order_submit_attempts == 0 {
            return Err(EngineError::Config(
                "executor.order_submit_attempts must be at least 1".to_string(),
            ));
        }
        if self.executor.plan_update_attempts == 0 {
            return Err(EngineError::Config(
                "executor.plan_update_attempts must be at least 1".to_string(),
            ));
        }
        if self.watcher.poll_interval_ms == 0 || self.watcher.order_poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "watcher poll intervals must be non-zero".to_string(),
            ));
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.chain_id == 0 {
                return Err(EngineError::Config(format!(
                    "Chain {} is enabled but has no chain_id",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains
            .values()
            .find(|c| c.enabled && c.chain_id == chain_id)
    }

    /// Whether submissions on this chain may go through a private relay
    pub fn private_relay_supported(&self, chain_id: u64) -> bool {
        self.private_relay.enabled
            && self
                .chain_by_id(chain_id)
                .map(|c| c.private_relay_supported)
                .unwrap_or(false)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
