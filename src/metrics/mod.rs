//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Flow and step execution
//! - Transaction submission and confirmation
//! - Watcher activity
//!
//! The registry is process-global; embedders scrape it through [`render`].

use crate::error::FailureKind;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // Flow metrics
    pub static ref FLOWS_STARTED: CounterVec = register_counter_vec!(
        "txflow_flows_started_total",
        "Total flows started by kind",
        &["flow_kind"]
    ).unwrap();

    pub static ref FLOWS_SUCCEEDED: CounterVec = register_counter_vec!(
        "txflow_flows_succeeded_total",
        "Total flows that ran to completion",
        &["flow_kind"]
    ).unwrap();

    pub static ref FLOWS_FAILED: CounterVec = register_counter_vec!(
        "txflow_flows_failed_total",
        "Total flows aborted by a step failure",
        &["flow_kind", "failure_kind"]
    ).unwrap();

    // Step metrics
    pub static ref STEPS_EXECUTED: CounterVec = register_counter_vec!(
        "txflow_steps_executed_total",
        "Total steps executed by kind",
        &["step_kind"]
    ).unwrap();

    pub static ref STEPS_FAILED: CounterVec = register_counter_vec!(
        "txflow_steps_failed_total",
        "Total step failures by kind",
        &["step_kind"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "txflow_transactions_submitted_total",
        "Total transactions submitted",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "txflow_transactions_confirmed_total",
        "Total transactions confirmed",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "txflow_transactions_failed_total",
        "Total transactions failed",
        &["chain_id"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "txflow_confirmation_latency_seconds",
        "Time from submission to terminal status",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Watcher metrics
    pub static ref WATCHER_ACTIVE: GaugeVec = register_gauge_vec!(
        "txflow_watcher_active_monitors",
        "Currently running monitor tasks per chain",
        &["chain_id"]
    ).unwrap();

    // Notification metrics
    pub static ref NOTIFICATIONS: CounterVec = register_counter_vec!(
        "txflow_notifications_total",
        "Total notifications pushed by type",
        &["notification"]
    ).unwrap();
}

/// Encode the registry in Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_flow_started(flow_kind: &str) {
    FLOWS_STARTED.with_label_values(&[flow_kind]).inc();
}

pub fn record_flow_succeeded(flow_kind: &str) {
    FLOWS_SUCCEEDED.with_label_values(&[flow_kind]).inc();
}

pub fn record_flow_failed(flow_kind: &str, failure: FailureKind) {
    FLOWS_FAILED
        .with_label_values(&[flow_kind, failure_label(failure)])
        .inc();
}

pub fn record_step_executed(step_kind: &str) {
    STEPS_EXECUTED.with_label_values(&[step_kind]).inc();
}

pub fn record_step_failed(step_kind: &str) {
    STEPS_FAILED.with_label_values(&[step_kind]).inc();
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_confirmed(chain_id: u64, latency_secs: f64) {
    TX_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
    CONFIRMATION_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_tx_failed(chain_id: u64) {
    TX_FAILED.with_label_values(&[&chain_id.to_string()]).inc();
}

pub fn record_monitor_started(chain_id: u64) {
    WATCHER_ACTIVE
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_monitor_finished(chain_id: u64) {
    WATCHER_ACTIVE
        .with_label_values(&[&chain_id.to_string()])
        .dec();
}

pub fn record_notification(name: &str) {
    NOTIFICATIONS.with_label_values(&[name]).inc();
}

fn failure_label(failure: FailureKind) -> &'static str {
    match failure {
        FailureKind::Abort => "abort",
        FailureKind::Retry => "retry",
        FailureKind::Validation => "validation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_flow_started("swap");
        record_step_executed("token_approval");
        record_tx_submitted(1);

        let output = render();
        assert!(output.contains("txflow_flows_started_total"));
        assert!(output.contains("txflow_steps_executed_total"));
    }
}
