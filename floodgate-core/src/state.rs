// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run state machine and the shared run record.
//!
//! Implements the run lifecycle: Idle → Running → Completed | Error, and back
//! to Running for the next run. Every mutation happens under one write lock,
//! so readers always see a consistent snapshot: a `completed` phase is never
//! visible before its end time and final throughput.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::config::RunConfiguration;
use crate::error::{FloodError, FloodResult, StateTransitionError};
use crate::types::{GIB, MIB};

/// Run lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run has started since the process came up.
    Idle,

    /// A pipeline is active.
    Running,

    /// The last run drained its channel and finished normally.
    Completed,

    /// The last run failed; `error` holds the reason.
    Error,
}

impl RunPhase {
    /// Get the phase name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Check if transition to the target phase is valid.
    pub fn can_transition_to(&self, target: RunPhase) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
                | (Self::Completed, Self::Running)
                | (Self::Error, Self::Running)
        )
    }

    /// Terminal for the run that reached it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Accumulated measurements for the current (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    /// Unix seconds when the run started.
    pub start_time: f64,
    /// Unix seconds when the run ended; zero while running.
    pub end_time: f64,
    pub duration_sec: f64,
    pub total_bytes: u64,
    pub throughput_mb_s: f64,
    /// Peak accelerator memory held by staged chunks.
    pub vram_used_gb: f64,
    pub files_processed: u64,
    pub chunks_transferred: u64,
    pub device_failures: u64,
    pub cancelled: bool,
}

/// Progress published by the consumer while a run is active.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSample {
    pub total_bytes: u64,
    pub chunks_transferred: u64,
    pub files_processed: u64,
    pub device_failures: u64,
    pub device_memory_bytes: u64,
    /// Only set once the run has been going for more than a second.
    pub throughput_mb_s: Option<f64>,
}

/// Final figures published exactly once when the consumer sees end of stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunOutcome {
    pub progress: ProgressSample,
    pub duration_sec: f64,
    pub cancelled: bool,
}

/// Snapshot of the process-wide run record.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    /// Monotonic run counter; zero until the first run starts.
    pub run_id: u64,
    pub status: RunPhase,
    pub config: RunConfiguration,
    pub metrics: Metrics,
    pub error: Option<String>,
}

/// Shared, lock-protected run record.
///
/// Cloned into the pipeline task and the API handlers; all clones refer to
/// the same record.
#[derive(Debug, Clone)]
pub struct SharedRunState {
    inner: Arc<RwLock<RunState>>,
}

impl SharedRunState {
    /// Create an idle record that reports `base` as its configuration.
    pub fn new(base: RunConfiguration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RunState {
                run_id: 0,
                status: RunPhase::Idle,
                config: base,
                metrics: Metrics::default(),
                error: None,
            })),
        }
    }

    /// Consistent copy of the whole record.
    pub fn snapshot(&self) -> RunState {
        self.read().clone()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RunPhase {
        self.read().status
    }

    /// Atomically move to `running` with a fresh configuration and zeroed metrics.
    ///
    /// Rejects with [`FloodError::Busy`] if a run is already active; the record
    /// is left untouched in that case. Returns the new run id.
    pub fn begin_run(&self, config: RunConfiguration, start_time: f64) -> FloodResult<u64> {
        let mut state = self.write();

        if state.status == RunPhase::Running {
            return Err(FloodError::Busy);
        }
        transition(&mut state, RunPhase::Running)?;

        state.run_id += 1;
        state.config = config;
        state.metrics = Metrics {
            start_time,
            ..Metrics::default()
        };
        state.error = None;

        Ok(state.run_id)
    }

    /// Publish in-flight progress for `run_id`.
    ///
    /// Ignored if the run is no longer the active one.
    pub fn record_progress(&self, run_id: u64, sample: &ProgressSample) {
        let mut state = self.write();
        if state.run_id != run_id || state.status != RunPhase::Running {
            return;
        }
        apply_progress(&mut state.metrics, sample);
    }

    /// Finalize `run_id` as completed.
    ///
    /// `outcome.duration_sec` must be measured from the same moment that was
    /// stamped as `start_time`; the end time is derived from the two.
    pub fn complete(&self, run_id: u64, outcome: &RunOutcome) -> FloodResult<()> {
        let mut state = self.write();
        if state.run_id != run_id {
            return Ok(());
        }

        apply_progress(&mut state.metrics, &outcome.progress);
        state.metrics.end_time = state.metrics.start_time + outcome.duration_sec;
        state.metrics.duration_sec = outcome.duration_sec;
        state.metrics.throughput_mb_s =
            throughput_mb_s(outcome.progress.total_bytes, outcome.duration_sec);
        state.metrics.cancelled = outcome.cancelled;
        transition(&mut state, RunPhase::Completed)?;

        Ok(())
    }

    /// Finalize `run_id` as failed, recording the human-readable cause.
    pub fn fail(&self, run_id: u64, error: &FloodError, end_time: f64) -> FloodResult<()> {
        let mut state = self.write();
        if state.run_id != run_id {
            return Ok(());
        }

        let started = state.metrics.start_time;
        state.metrics.end_time = end_time;
        state.metrics.duration_sec = (end_time - started).max(0.0);
        state.error = Some(error.to_string());
        transition(&mut state, RunPhase::Error)?;

        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, RunState> {
        // A panic while holding the lock cannot leave a half-written record:
        // every writer finishes its field group before releasing.
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// MiB per second over `duration_sec`; zero for an empty interval.
pub fn throughput_mb_s(total_bytes: u64, duration_sec: f64) -> f64 {
    if duration_sec > 0.0 {
        total_bytes as f64 / MIB as f64 / duration_sec
    } else {
        0.0
    }
}

fn transition(state: &mut RunState, target: RunPhase) -> Result<(), StateTransitionError> {
    if !state.status.can_transition_to(target) {
        return Err(StateTransitionError::InvalidTransition {
            from: state.status.name(),
            to: target.name(),
        });
    }

    tracing::debug!(
        run_id = state.run_id,
        from = state.status.name(),
        to = target.name(),
        "Run state transition"
    );

    state.status = target;
    Ok(())
}

fn apply_progress(metrics: &mut Metrics, sample: &ProgressSample) {
    // total_bytes never decreases within a run
    metrics.total_bytes = metrics.total_bytes.max(sample.total_bytes);
    metrics.chunks_transferred = sample.chunks_transferred;
    metrics.files_processed = sample.files_processed;
    metrics.device_failures = sample.device_failures;
    metrics.vram_used_gb = sample.device_memory_bytes as f64 / GIB as f64;
    if let Some(throughput) = sample.throughput_mb_s {
        metrics.throughput_mb_s = throughput;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    fn base() -> RunConfiguration {
        ConfigLoader::load_string("").unwrap().run
    }

    #[test]
    fn test_initial_state() {
        let state = SharedRunState::new(base());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, RunPhase::Idle);
        assert_eq!(snapshot.run_id, 0);
        assert_eq!(snapshot.metrics, Metrics::default());
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(RunPhase::Idle.can_transition_to(RunPhase::Running));
        assert!(RunPhase::Running.can_transition_to(RunPhase::Completed));
        assert!(RunPhase::Running.can_transition_to(RunPhase::Error));
        assert!(RunPhase::Completed.can_transition_to(RunPhase::Running));
        assert!(RunPhase::Error.can_transition_to(RunPhase::Running));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!RunPhase::Idle.can_transition_to(RunPhase::Completed));
        assert!(!RunPhase::Idle.can_transition_to(RunPhase::Error));
        assert!(!RunPhase::Running.can_transition_to(RunPhase::Running));
        assert!(!RunPhase::Completed.can_transition_to(RunPhase::Error));
    }

    #[test]
    fn test_busy_rejection_leaves_state_unchanged() {
        let state = SharedRunState::new(base());
        let run_id = state.begin_run(base(), 100.0).unwrap();
        state.record_progress(
            run_id,
            &ProgressSample {
                total_bytes: 42,
                ..Default::default()
            },
        );
        let before = state.snapshot();

        let mut other = base();
        other.model_file = "other.bin".to_string();
        assert!(matches!(state.begin_run(other, 200.0), Err(FloodError::Busy)));

        let after = state.snapshot();
        assert_eq!(after.run_id, before.run_id);
        assert_eq!(after.status, RunPhase::Running);
        assert_eq!(after.config, before.config);
        assert_eq!(after.metrics, before.metrics);
    }

    #[test]
    fn test_complete_sets_all_final_fields() {
        let state = SharedRunState::new(base());
        let run_id = state.begin_run(base(), 100.0).unwrap();
        let outcome = RunOutcome {
            progress: ProgressSample {
                total_bytes: 4 * MIB,
                chunks_transferred: 4,
                ..Default::default()
            },
            duration_sec: 2.0,
            cancelled: false,
        };
        state.complete(run_id, &outcome).unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, RunPhase::Completed);
        assert_eq!(snapshot.metrics.end_time, 102.0);
        assert_eq!(snapshot.metrics.duration_sec, 2.0);
        assert_eq!(snapshot.metrics.total_bytes, 4 * MIB);
        assert!((snapshot.metrics.throughput_mb_s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_complete_end_time_matches_duration() {
        let state = SharedRunState::new(base());
        let run_id = state.begin_run(base(), 1_700_000_000.25).unwrap();
        let outcome = RunOutcome {
            duration_sec: 3.5,
            ..Default::default()
        };
        state.complete(run_id, &outcome).unwrap();

        let metrics = state.snapshot().metrics;
        assert_eq!(metrics.end_time - metrics.start_time, metrics.duration_sec);
    }

    #[test]
    fn test_throughput_guards_empty_interval() {
        assert_eq!(throughput_mb_s(10 * MIB, 0.0), 0.0);
        assert_eq!(throughput_mb_s(0, 0.0), 0.0);
        assert!((throughput_mb_s(10 * MIB, 5.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fail_records_message() {
        let state = SharedRunState::new(base());
        let run_id = state.begin_run(base(), 10.0).unwrap();
        let err = FloodError::SourceNotFound {
            path: "/mnt/data/model.bin".into(),
        };
        state.fail(run_id, &err, 10.5).unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, RunPhase::Error);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Source not found: /mnt/data/model.bin")
        );
        assert_eq!(snapshot.metrics.total_bytes, 0);
    }

    #[test]
    fn test_new_run_resets_metrics_and_error() {
        let state = SharedRunState::new(base());
        let first = state.begin_run(base(), 1.0).unwrap();
        state.record_progress(
            first,
            &ProgressSample {
                total_bytes: 1000,
                ..Default::default()
            },
        );
        state
            .fail(first, &FloodError::ChannelClosed, 2.0)
            .unwrap();

        let second = state.begin_run(base(), 3.0).unwrap();
        assert_eq!(second, first + 1);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.metrics.total_bytes, 0);
        assert_eq!(snapshot.metrics.start_time, 3.0);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_stale_run_updates_ignored() {
        let state = SharedRunState::new(base());
        let first = state.begin_run(base(), 1.0).unwrap();
        state
            .fail(first, &FloodError::ChannelClosed, 2.0)
            .unwrap();
        let _second = state.begin_run(base(), 3.0).unwrap();

        state.record_progress(
            first,
            &ProgressSample {
                total_bytes: 999,
                ..Default::default()
            },
        );
        assert_eq!(state.snapshot().metrics.total_bytes, 0);
    }

    #[test]
    fn test_total_bytes_monotonic() {
        let state = SharedRunState::new(base());
        let run_id = state.begin_run(base(), 1.0).unwrap();
        let mut sample = ProgressSample {
            total_bytes: 500,
            ..Default::default()
        };
        state.record_progress(run_id, &sample);
        sample.total_bytes = 200;
        state.record_progress(run_id, &sample);
        assert_eq!(state.snapshot().metrics.total_bytes, 500);
    }

    #[test]
    fn test_state_document_shape() {
        let state = SharedRunState::new(base());
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["config"]["threads"], 4);
        assert_eq!(json["config"]["gpu_available"], false);
        assert_eq!(json["metrics"]["total_bytes"], 0);
        assert!(json["metrics"].get("throughput_mb_s").is_some());
        assert!(json["metrics"].get("vram_used_gb").is_some());
        assert!(json["error"].is_null());
    }
}
