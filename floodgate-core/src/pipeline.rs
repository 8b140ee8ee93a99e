// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! One benchmark run, end to end.
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐  ch(capacity)  ┌──────────┐
//! │   Source   │──►│ Producer pool │───────────────►│ Consumer │──► RunState
//! │ enumerator │   │ (≤ threads)   │   + sentinel   │  / sink  │
//! └────────────┘   └───────────────┘                └──────────┘
//! ```
//!
//! Source errors abort before any producer exists. The producer pool runs on
//! its own task; the consumer runs on the caller's. A producer failure closes
//! the channel without a sentinel, so the consumer stops and the producer's
//! error is reported as the cause.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::accelerator::{Accelerator, SyncPolicy};
use crate::channel;
use crate::config::RunConfiguration;
use crate::consumer::Consumer;
use crate::error::{FloodError, FloodResult};
use crate::producer::{ProducerPool, ProducerReport};
use crate::source;
use crate::state::{RunOutcome, SharedRunState};

/// Everything a finished run produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub produced: ProducerReport,
    /// Most chunks ever queued at once.
    pub channel_high_water: usize,
}

/// Inputs for a single pipeline execution.
pub struct PipelineRun {
    pub run_id: u64,
    pub config: RunConfiguration,
    pub state: SharedRunState,
    pub cancel: CancellationToken,
    pub accelerator: Option<Box<dyn Accelerator>>,
    pub sync_policy: SyncPolicy,
    /// Taken together with the run's `start_time`; every duration is
    /// measured from here, enumeration included.
    pub started: Instant,
}

impl PipelineRun {
    /// Execute the run. On success the consumer has already marked the run
    /// completed; on failure the caller records the error.
    pub async fn execute(self) -> FloodResult<RunSummary> {
        let PipelineRun {
            run_id,
            config,
            state,
            cancel,
            accelerator,
            sync_policy,
            started,
        } = self;

        tracing::info!(
            run_id,
            mode = ?config.source_mode,
            source = %config.source_path().display(),
            synthetic_bytes = config.synthetic_size_bytes,
            chunk_size = %config.chunk_size,
            threads = %config.threads,
            channel_capacity = config.channel_capacity,
            accelerator = ?accelerator.as_ref().map(|a| a.name()),
            "Starting benchmark"
        );

        let source = source::enumerate(&config)?;
        if let source::SourceSet::Files { paths, .. } = &source {
            tracing::info!(run_id, files = paths.len(), "Found files to read");
        }

        let (tx, rx) = channel::bounded(config.channel_capacity);
        let gauge = tx.gauge();

        let pool = ProducerPool::new(config.threads, cancel.clone());
        let mut consumer = Consumer::new(run_id, state, cancel)
            .with_sync_policy(sync_policy)
            .with_file_counter(pool.files_completed());
        if let Some(device) = accelerator {
            consumer = consumer.with_accelerator(device);
        }

        let producers = tokio::spawn(pool.run(source, tx));
        let consumed = consumer.run(rx, started).await;

        let produced = match producers.await {
            Ok(result) => result,
            Err(join_err) => Err(FloodError::TaskFailed {
                reason: format!("producer pool panicked: {}", join_err),
            }),
        };

        // The producer error is the root cause when both sides fail.
        let produced = produced?;
        let outcome = consumed?;

        Ok(RunSummary {
            outcome,
            produced,
            channel_high_water: gauge.high_water(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, SourceMode};
    use crate::report::unix_timestamp;
    use crate::state::RunPhase;
    use crate::types::ChunkSize;
    use tempfile::TempDir;

    fn pipeline(config: RunConfiguration) -> (PipelineRun, SharedRunState) {
        let state = SharedRunState::new(config.clone());
        let run_id = state.begin_run(config.clone(), unix_timestamp()).unwrap();
        (
            PipelineRun {
                run_id,
                config,
                state: state.clone(),
                cancel: CancellationToken::new(),
                accelerator: None,
                sync_policy: SyncPolicy::default(),
                started: Instant::now(),
            },
            state,
        )
    }

    #[tokio::test]
    async fn test_synthetic_run() {
        let mut config = ConfigLoader::load_string("").unwrap().run;
        config.source_mode = SourceMode::Synthetic;
        config.synthetic_size_bytes = 1000;
        config.chunk_size = ChunkSize::new(64).unwrap();

        let (run, state) = pipeline(config);
        let summary = run.execute().await.unwrap();

        assert_eq!(summary.outcome.progress.total_bytes, 1000);
        assert_eq!(summary.produced.chunks, 16);
        assert!(summary.channel_high_water <= 8);
        assert_eq!(state.phase(), RunPhase::Completed);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_producers() {
        let dir = TempDir::new().unwrap();
        let mut config = ConfigLoader::load_string("").unwrap().run;
        config.mount_path = dir.path().to_path_buf();
        config.model_file = "absent".to_string();

        let (run, state) = pipeline(config);
        let result = run.execute().await;

        assert!(matches!(result, Err(FloodError::SourceNotFound { .. })));
        // The caller records failures; nothing was transferred.
        assert_eq!(state.snapshot().metrics.total_bytes, 0);
    }
}
