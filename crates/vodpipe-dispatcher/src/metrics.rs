//! Prometheus metrics for the dispatcher.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{DispatchError, DispatchResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "vodpipe_dispatcher_messages_total";
    pub const RECORDS_TOTAL: &str = "vodpipe_dispatcher_records_total";
    pub const LAUNCHES_TOTAL: &str = "vodpipe_dispatcher_launches_total";
    pub const LAUNCH_FAILURES_TOTAL: &str = "vodpipe_dispatcher_launch_failures_total";
    pub const POLL_ERRORS_TOTAL: &str = "vodpipe_dispatcher_poll_errors_total";
}

/// Serve the Prometheus scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> DispatchResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| DispatchError::config_error(format!("Failed to start metrics exporter on {}: {}", addr, e)))
}

/// Record a handled message by outcome.
pub fn record_message(outcome: &'static str) {
    counter!(names::MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a processed notification record by outcome.
pub fn record_record(outcome: &'static str) {
    counter!(names::RECORDS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_launch(launcher: &'static str) {
    counter!(names::LAUNCHES_TOTAL, "launcher" => launcher).increment(1);
}

pub fn record_launch_failure(launcher: &'static str) {
    counter!(names::LAUNCH_FAILURES_TOTAL, "launcher" => launcher).increment(1);
}

pub fn record_poll_error() {
    counter!(names::POLL_ERRORS_TOTAL).increment(1);
}
