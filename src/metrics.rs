// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! application chooses the exporter.
//!
//! # Metric Naming Convention
//! - `change_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms
//!
//! # Labels
//! - `operation`: changeset, create, update, update_file, delete, query
//! - `status`: success, rejected, canceled, error

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one network operation.
pub fn record_request(operation: &str, status: &str) {
    counter!(
        "change_sync_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record request latency.
pub fn record_request_latency(operation: &str, duration: Duration) {
    histogram!(
        "change_sync_request_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the shape of a sent changeset.
pub fn record_changeset(instances: usize, bytes: usize) {
    histogram!("change_sync_changeset_instances").record(instances as f64);
    histogram!("change_sync_changeset_bytes").record(bytes as f64);
}

/// Record a fully synced group.
pub fn record_group_synced() {
    counter!("change_sync_groups_synced_total").increment(1);
}

/// Record a per-instance failure by kind.
pub fn record_instance_failure(kind: &str) {
    counter!(
        "change_sync_instance_failures_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a completed sync run.
pub fn record_sync_run(status: &str, duration: Duration) {
    counter!(
        "change_sync_runs_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("change_sync_run_seconds").record(duration.as_secs_f64());
}

/// RAII timer that records request latency on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_request_latency(self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // With no recorder installed these are no-ops; the tests pin that the
    // helpers never panic.
    #[test]
    fn test_helpers_do_not_panic_without_recorder() {
        record_request("changeset", "success");
        record_request_latency("create", Duration::from_millis(5));
        record_changeset(10, 4096);
        record_group_synced();
        record_instance_failure("rejected");
        record_sync_run("done", Duration::from_secs(1));
    }

    #[test]
    fn test_latency_timer_drops_cleanly() {
        let timer = LatencyTimer::new("update");
        drop(timer);
    }
}
