//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wallet_session_transitions_total` (counter): by transition
//! - `wallet_balance_refresh_total` (counter): by outcome
//! - `wallet_gas_estimates_total` (counter): by outcome
//! - `wallet_transactions_total` (counter): by terminal status
//! - `wallet_pending_transactions` (gauge): entries in the pending map
//! - `wallet_stale_results_dropped_total` (counter): by source
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing unless they opt in.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_transition(transition: &'static str) {
    metrics::counter!("wallet_session_transitions_total", "transition" => transition).increment(1);
}

pub fn record_balance_refresh(outcome: &'static str) {
    metrics::counter!("wallet_balance_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_gas_estimate(outcome: &'static str) {
    metrics::counter!("wallet_gas_estimates_total", "outcome" => outcome).increment(1);
}

pub fn record_transaction(status: &'static str) {
    metrics::counter!("wallet_transactions_total", "status" => status).increment(1);
}

pub fn record_pending_count(count: usize) {
    metrics::gauge!("wallet_pending_transactions").set(count as f64);
}

pub fn record_stale_result(source: &'static str) {
    metrics::counter!("wallet_stale_results_dropped_total", "source" => source).increment(1);
}
