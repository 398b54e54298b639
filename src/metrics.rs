//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Plan step execution
//! - Transaction and order submission
//! - Nonce resolution paths
//! - Watcher health
//!
//! The engine is embedded, so there is no metrics server here; hosts call
//! [`render`] from whatever endpoint they already serve.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // Step metrics
    pub static ref STEPS_EXECUTED: CounterVec = register_counter_vec!(
        "wallet_engine_steps_executed_total",
        "Total plan steps executed by kind",
        &["chain_id", "step"]
    ).unwrap();

    pub static ref STEPS_FAILED: CounterVec = register_counter_vec!(
        "wallet_engine_steps_failed_total",
        "Total plan steps that failed by kind",
        &["chain_id", "step"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "wallet_engine_transactions_submitted_total",
        "Total transactions broadcast",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FINALIZED: CounterVec = register_counter_vec!(
        "wallet_engine_transactions_finalized_total",
        "Total transactions reaching a final status",
        &["chain_id", "status"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "wallet_engine_transaction_latency_seconds",
        "Time from record creation to finalization",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Order metrics
    pub static ref ORDERS_SUBMITTED: CounterVec = register_counter_vec!(
        "wallet_engine_orders_submitted_total",
        "Total orders accepted by the order service",
        &["chain_id"]
    ).unwrap();

    // Nonce metrics
    pub static ref NONCE_RESOLVED: CounterVec = register_counter_vec!(
        "wallet_engine_nonce_resolved_total",
        "Total nonce resolutions by source",
        &["chain_id", "source"]
    ).unwrap();

    pub static ref NONCE_DEGRADED: CounterVec = register_counter_vec!(
        "wallet_engine_nonce_degraded_total",
        "Nonce resolutions that fell back to provider assignment",
        &["chain_id"]
    ).unwrap();

    // Retry metrics
    pub static ref RETRIES: CounterVec = register_counter_vec!(
        "wallet_engine_retries_total",
        "Total retries by operation",
        &["operation"]
    ).unwrap();

    // Watcher metrics
    pub static ref WATCHER_ERRORS: CounterVec = register_counter_vec!(
        "wallet_engine_watcher_errors_total",
        "Watchers that died with an error",
        &["chain_id"]
    ).unwrap();

    pub static ref ACTIVE_WATCHERS: GaugeVec = register_gauge_vec!(
        "wallet_engine_active_watchers",
        "Watchers currently running",
        &[]
    ).unwrap();
}

/// Render all metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_step_executed(chain_id: u64, step: &str) {
    STEPS_EXECUTED
        .with_label_values(&[&chain_id.to_string(), step])
        .inc();
}

pub fn record_step_failed(chain_id: u64, step: &str) {
    STEPS_FAILED
        .with_label_values(&[&chain_id.to_string(), step])
        .inc();
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_finalized(chain_id: u64, status: &str) {
    TX_FINALIZED
        .with_label_values(&[&chain_id.to_string(), status])
        .inc();
}

pub fn record_tx_latency(chain_id: u64, latency_secs: f64) {
    TX_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_order_submitted(chain_id: u64) {
    ORDERS_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_nonce_resolved(chain_id: u64, source: &str) {
    NONCE_RESOLVED
        .with_label_values(&[&chain_id.to_string(), source])
        .inc();
}

pub fn record_nonce_degraded(chain_id: u64) {
    NONCE_DEGRADED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_retry(operation: &str) {
    RETRIES.with_label_values(&[operation]).inc();
}

pub fn record_watcher_error(chain_id: u64) {
    WATCHER_ERRORS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn set_active_watchers(count: usize) {
    ACTIVE_WATCHERS.with_label_values(&[]).set(count as f64);
}
