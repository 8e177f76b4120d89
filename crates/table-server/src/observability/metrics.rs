//! Metrics definitions for the table server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `table_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `reason`: 3 values (normal, server_shutdown, participant_left)
//! - `component`: 2 values (waiting_room, matchmaker)

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder and return the handle used to
/// render `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `table_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("table_connections_active").set(count as f64);
}

/// Metric: `table_waiting_room_depth`
pub fn set_waiting_room_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("table_waiting_room_depth").set(depth as f64);
}

/// Metric: `table_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("table_sessions_active").set(count as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// A full cohort was handed to the session registry.
///
/// Metric: `table_cohorts_dispatched_total`
pub fn record_cohort_dispatched() {
    counter!("table_cohorts_dispatched_total").increment(1);
}

/// A cohort was discarded because shutdown had already been requested.
///
/// Metric: `table_cohorts_dropped_total`
pub fn record_cohort_dropped() {
    counter!("table_cohorts_dropped_total").increment(1);
}

/// Metric: `table_sessions_finished_total`
/// Labels: `reason`
pub fn record_session_finished(reason: &'static str) {
    counter!("table_sessions_finished_total", "reason" => reason).increment(1);
}

/// Entries removed in response to a disconnect notification.
///
/// Metric: `table_disconnect_purges_total`
/// Labels: `component`
pub fn record_disconnect_purges(component: &'static str, removed: usize) {
    counter!("table_disconnect_purges_total", "component" => component)
        .increment(u64::try_from(removed).unwrap_or(u64::MAX));
}

/// A session task terminated without finishing.
///
/// Metric: `table_session_panics_total`
pub fn record_session_panic() {
    counter!("table_session_panics_total").increment(1);
}
