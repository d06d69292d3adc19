//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Gas price tiers and feed health
//! - Transaction preparation outcomes
//! - Pending transaction transitions
//! - History sync

use crate::error::{WalletError, WalletResult};
use crate::state::TransactionState;

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Gas metrics
    pub static ref GAS_PRICE_GWEI: GaugeVec = register_gauge_vec!(
        "wallet_gas_price_gwei",
        "Current gas price per tier in gwei",
        &["tier"]
    ).unwrap();

    pub static ref GAS_REFRESH: CounterVec = register_counter_vec!(
        "wallet_gas_refresh_total",
        "Gas price refreshes by outcome",
        &["outcome"]
    ).unwrap();

    // Preparation metrics
    pub static ref TX_PREPARED: CounterVec = register_counter_vec!(
        "wallet_transactions_prepared_total",
        "Transaction preparations by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    // Tracking metrics
    pub static ref TX_TRANSITIONS: CounterVec = register_counter_vec!(
        "wallet_transaction_transitions_total",
        "Pending transaction transitions by resulting state",
        &["state"]
    ).unwrap();

    pub static ref TX_DROPPED: CounterVec = register_counter_vec!(
        "wallet_transactions_dropped_total",
        "Pending transactions deleted after a remote error",
        &[]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "wallet_transactions_submitted_total",
        "Signed transactions accepted by the node",
        &["kind"]
    ).unwrap();

    pub static ref HISTORY_FETCHED: CounterVec = register_counter_vec!(
        "wallet_history_transactions_fetched_total",
        "Confirmed transactions fetched from the history indexer",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> WalletResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| WalletError::Config(format!("Cannot bind metrics port: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| WalletError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_gas_price(tier: &str, wei: U256) {
    let gwei = wei.low_u128() as f64 / 1e9;
    GAS_PRICE_GWEI.with_label_values(&[tier]).set(gwei);
}

pub fn record_gas_refresh(success: bool) {
    GAS_REFRESH
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
}

pub fn record_preparation(kind: &str, outcome: &str) {
    TX_PREPARED.with_label_values(&[kind, outcome]).inc();
}

pub fn record_transition(state: TransactionState) {
    TX_TRANSITIONS.with_label_values(&[state.as_str()]).inc();
}

pub fn record_dropped() {
    TX_DROPPED.with_label_values(&[]).inc();
}

pub fn record_submitted(kind: &str) {
    TX_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_history_fetched(count: usize) {
    HISTORY_FETCHED.with_label_values(&[]).inc_by(count as f64);
}
