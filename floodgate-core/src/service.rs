// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmark service: owns the run record and launches runs.
//!
//! Shared by every API handler. `start` validates, claims the `running`
//! phase, spawns the pipeline and returns at once; it never waits for the
//! run. Pipeline failures land in the run record, never in the caller.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::accelerator::{Accelerator, StagingArena, SyncPolicy};
use crate::config::{ConfigOverrides, RunConfiguration};
use crate::error::{FloodError, FloodResult};
use crate::pipeline::{PipelineRun, RunSummary};
use crate::report::{unix_timestamp, Report};
use crate::state::{RunPhase, RunState, SharedRunState};

/// Builds the accelerator for a run, or `None` to measure host memory only.
pub type AcceleratorFactory =
    Arc<dyn Fn(&RunConfiguration) -> Option<Box<dyn Accelerator>> + Send + Sync>;

/// Handle to a run that has been launched.
#[derive(Debug)]
pub struct StartedRun {
    pub run_id: u64,
    pub handle: JoinHandle<FloodResult<RunSummary>>,
}

/// Process-wide benchmark service. Cheap to clone.
#[derive(Clone)]
pub struct BenchmarkService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    base: RunConfiguration,
    state: SharedRunState,
    accelerator: AcceleratorFactory,
    sync_policy: SyncPolicy,
    active: Mutex<Option<(u64, CancellationToken)>>,
}

impl BenchmarkService {
    /// Create a service whose runs stage into a [`StagingArena`] when the
    /// configuration reports an accelerator.
    pub fn new(base: RunConfiguration) -> Self {
        Self::with_accelerator(base, Arc::new(default_accelerator))
    }

    /// Create a service with a custom accelerator backend.
    pub fn with_accelerator(base: RunConfiguration, accelerator: AcceleratorFactory) -> Self {
        Self::with_options(base, accelerator, SyncPolicy::default())
    }

    pub fn with_options(
        base: RunConfiguration,
        accelerator: AcceleratorFactory,
        sync_policy: SyncPolicy,
    ) -> Self {
        let state = SharedRunState::new(base.clone());
        Self {
            inner: Arc::new(ServiceInner {
                base,
                state,
                accelerator,
                sync_policy,
                active: Mutex::new(None),
            }),
        }
    }

    /// Base configuration every run starts from.
    pub fn base_config(&self) -> &RunConfiguration {
        &self.inner.base
    }

    /// The shared run record.
    pub fn state(&self) -> &SharedRunState {
        &self.inner.state
    }

    /// Consistent copy of the run record.
    pub fn snapshot(&self) -> RunState {
        self.inner.state.snapshot()
    }

    /// Timestamped copy of the run record.
    pub fn report(&self) -> Report {
        Report::new(self.snapshot())
    }

    /// Launch a run with `overrides` merged onto the base configuration.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`FloodError::Busy`] while a run is active, or with a validation
    /// error if the overrides are invalid; neither changes the run record.
    pub fn start(&self, overrides: &ConfigOverrides) -> FloodResult<StartedRun> {
        if self.inner.state.phase() == RunPhase::Running {
            return Err(FloodError::Busy);
        }

        let config = self.inner.base.with_overrides(overrides)?;
        let started = Instant::now();
        let run_id = self.inner.state.begin_run(config.clone(), unix_timestamp())?;

        let cancel = CancellationToken::new();
        *self.active() = Some((run_id, cancel.clone()));

        let accelerator = if config.gpu_available {
            (self.inner.accelerator)(&config)
        } else {
            None
        };

        let run = PipelineRun {
            run_id,
            config,
            state: self.inner.state.clone(),
            cancel,
            accelerator,
            sync_policy: self.inner.sync_policy,
            started,
        };

        let service = self.clone();
        let handle = tokio::spawn(async move {
            let result = run.execute().await;
            if let Err(e) = &result {
                tracing::error!(run_id, error = %e, "Benchmark failed");
                if let Err(state_err) = service.inner.state.fail(run_id, e, unix_timestamp()) {
                    tracing::error!(run_id, error = %state_err, "Could not record run failure");
                }
            }
            service.clear_active(run_id);
            result
        });

        Ok(StartedRun { run_id, handle })
    }

    /// Raise the active run's cancellation signal.
    ///
    /// Producers stop at their next chunk boundary; the consumer still drains
    /// what is queued, so the run ends `completed` with `cancelled` set.
    pub fn stop(&self) -> FloodResult<u64> {
        match self.active().as_ref() {
            Some((run_id, cancel)) => {
                tracing::info!(run_id = *run_id, "Stopping benchmark");
                cancel.cancel();
                Ok(*run_id)
            }
            None => Err(FloodError::NotRunning),
        }
    }

    /// Start a run and wait for it; returns the final run record.
    ///
    /// A failed run is not an `Err` here: the failure is in the record.
    pub async fn run_to_completion(&self, overrides: &ConfigOverrides) -> FloodResult<RunState> {
        let started = self.start(overrides)?;
        let finished = started.handle.await.map_err(|e| FloodError::TaskFailed {
            reason: format!("benchmark task panicked: {}", e),
        })?;
        if let Ok(summary) = finished {
            tracing::debug!(
                run_id = started.run_id,
                channel_high_water = summary.channel_high_water,
                "Run joined"
            );
        }
        Ok(self.snapshot())
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_active(&self, run_id: u64) {
        let mut active = self.active();
        if matches!(active.as_ref(), Some((id, _)) if *id == run_id) {
            *active = None;
        }
    }
}

fn default_accelerator(config: &RunConfiguration) -> Option<Box<dyn Accelerator>> {
    Some(Box::new(StagingArena::new(config.accelerator_memory_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, SourceMode};
    use crate::types::ChunkSize;

    fn synthetic_base(bytes: u64, chunk: u64) -> RunConfiguration {
        let mut config = ConfigLoader::load_string("").unwrap().run;
        config.source_mode = SourceMode::Synthetic;
        config.synthetic_size_bytes = bytes;
        config.chunk_size = ChunkSize::new(chunk).unwrap();
        config
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let service = BenchmarkService::new(synthetic_base(4096, 1024));
        let state = service.run_to_completion(&ConfigOverrides::default()).await.unwrap();
        assert_eq!(state.status, RunPhase::Completed);
        assert_eq!(state.metrics.total_bytes, 4096);
        assert_eq!(state.run_id, 1);
        let metrics = state.metrics;
        assert!((metrics.end_time - metrics.start_time - metrics.duration_sec).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_invalid_overrides_do_not_start() {
        let service = BenchmarkService::new(synthetic_base(4096, 1024));
        let overrides = ConfigOverrides {
            threads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            service.start(&overrides),
            Err(FloodError::HardValidation(_))
        ));
        assert_eq!(service.snapshot().status, RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_stop_without_run() {
        let service = BenchmarkService::new(synthetic_base(1, 1));
        assert!(matches!(service.stop(), Err(FloodError::NotRunning)));
    }

    #[tokio::test]
    async fn test_failed_run_is_recorded() {
        let mut base = ConfigLoader::load_string("").unwrap().run;
        base.mount_path = "/nonexistent/floodgate".into();
        let service = BenchmarkService::new(base);

        let state = service.run_to_completion(&ConfigOverrides::default()).await.unwrap();
        assert_eq!(state.status, RunPhase::Error);
        assert!(state.error.unwrap().contains("Source not found"));
        assert_eq!(state.metrics.total_bytes, 0);
        assert!(matches!(service.stop(), Err(FloodError::NotRunning)));
    }

    #[tokio::test]
    async fn test_overrides_apply_per_run_only() {
        let service = BenchmarkService::new(synthetic_base(4096, 1024));
        let overrides = ConfigOverrides {
            synthetic_size_gb: Some(0.0),
            ..Default::default()
        };
        let first = service.run_to_completion(&overrides).await.unwrap();
        assert_eq!(first.metrics.total_bytes, 0);

        let second = service.run_to_completion(&ConfigOverrides::default()).await.unwrap();
        assert_eq!(second.metrics.total_bytes, 4096);
        assert_eq!(service.base_config().synthetic_size_bytes, 4096);
    }
}
