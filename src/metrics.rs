// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync layer.
//!
//! Uses the `metrics` crate facade. The host application installs the
//! exporter; without one every call is a no-op.
//!
//! # Metric Naming Convention
//! - `fastlandz_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: progress_update, journal_create, journal_update, fast_session_update
//! - `status`: success, failure
//! - `outcome`: applied, queued, rejected, local_only

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an operation appended to the queue
pub fn record_enqueue(kind: &str) {
    counter!("fastlandz_sync_enqueued_total", "kind" => kind.to_string()).increment(1);
}

/// Record one processing attempt
pub fn record_operation(kind: &str, status: &str) {
    counter!(
        "fastlandz_sync_operations_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record an operation dropped after exhausting its retries
pub fn record_dropped(kind: &str) {
    counter!("fastlandz_sync_dropped_total", "kind" => kind.to_string()).increment(1);
}

/// Set current queue length
pub fn set_queue_depth(depth: usize) {
    gauge!("fastlandz_sync_queue_depth").set(depth as f64);
}

/// Record a completed drain pass
pub fn record_drain(processed: usize, failed: usize, duration: Duration) {
    counter!("fastlandz_sync_drain_passes_total").increment(1);
    counter!("fastlandz_sync_drain_processed_total").increment(processed as u64);
    counter!("fastlandz_sync_drain_failed_total").increment(failed as u64);
    histogram!("fastlandz_sync_drain_seconds").record(duration.as_secs_f64());
}

/// Record how a domain write was resolved
pub fn record_write(kind: &str, outcome: &str) {
    counter!(
        "fastlandz_sync_writes_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set connectivity as seen by the watcher (1 = online)
pub fn set_online(online: bool) {
    gauge!("fastlandz_sync_online").set(if online { 1.0 } else { 0.0 });
}
