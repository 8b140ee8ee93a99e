// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Prometheus exposition of the run record.

use std::sync::atomic::{AtomicU64, Ordering};

use floodgate_core::{RunPhase, RunState};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder,
    Gauge, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    pub static ref BYTES_TRANSFERRED: IntGauge = register_int_gauge!(
        "floodgate_bytes_transferred_total",
        "Bytes credited to the current or most recent run"
    )
    .unwrap();
    pub static ref THROUGHPUT: Gauge = register_gauge!(
        "floodgate_throughput_mb_s",
        "Throughput of the current or most recent run in MiB/s"
    )
    .unwrap();
    pub static ref RUNS: IntCounterVec = register_int_counter_vec!(
        "floodgate_runs_total",
        "Finished benchmark runs by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref DEVICE_FAILURES: IntCounter = register_int_counter!(
        "floodgate_device_failures_total",
        "Accelerator staging and synchronize failures across all runs"
    )
    .unwrap();
}

/// Highest run id already folded into the counters.
static LAST_COUNTED_RUN: AtomicU64 = AtomicU64::new(0);

/// Refresh the gauges from a snapshot.
pub fn observe(state: &RunState) {
    BYTES_TRANSFERRED.set(i64::try_from(state.metrics.total_bytes).unwrap_or(i64::MAX));
    THROUGHPUT.set(state.metrics.throughput_mb_s);
}

/// Fold a finished run into the counters, once per run id.
pub fn record_finished(state: &RunState) {
    if !state.status.is_terminal() {
        return;
    }
    let previous = LAST_COUNTED_RUN.fetch_max(state.run_id, Ordering::AcqRel);
    if previous >= state.run_id {
        return;
    }

    let outcome = match state.status {
        RunPhase::Error => "error",
        _ if state.metrics.cancelled => "cancelled",
        _ => "completed",
    };
    RUNS.with_label_values(&[outcome]).inc();
    DEVICE_FAILURES.inc_by(state.metrics.device_failures);
    observe(state);
}

/// Text exposition of every registered metric.
pub fn render() -> String {
    // Register everything before the first gather
    lazy_static::initialize(&BYTES_TRANSFERRED);
    lazy_static::initialize(&THROUGHPUT);
    lazy_static::initialize(&RUNS);
    lazy_static::initialize(&DEVICE_FAILURES);

    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use floodgate_core::{ConfigLoader, SharedRunState};

    #[test]
    fn test_finished_run_counted_once() {
        let state = SharedRunState::new(ConfigLoader::load_string("").unwrap().run);
        let mut snapshot = state.snapshot();
        snapshot.run_id = 1_000_000;
        snapshot.status = RunPhase::Error;

        let before = RUNS.with_label_values(&["error"]).get();
        record_finished(&snapshot);
        record_finished(&snapshot);
        assert_eq!(RUNS.with_label_values(&["error"]).get(), before + 1);
    }

    #[test]
    fn test_running_state_not_counted() {
        let state = SharedRunState::new(ConfigLoader::load_string("").unwrap().run);
        let mut snapshot = state.snapshot();
        snapshot.run_id = 2_000_000;
        snapshot.status = RunPhase::Running;

        record_finished(&snapshot);
        assert!(LAST_COUNTED_RUN.load(Ordering::Acquire) < 2_000_000);
    }

    #[test]
    fn test_render_lists_gauges() {
        let text = render();
        assert!(text.contains("floodgate_throughput_mb_s"));
        assert!(text.contains("floodgate_bytes_transferred_total"));
        assert!(text.contains("floodgate_device_failures_total"));
    }
}
