// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Consumer / sink.
//!
//! The single task that drains the transfer channel and the only writer of
//! run metrics. Each chunk is optionally staged into accelerator memory,
//! then credited to the byte counters. Progress is published on every chunk
//! and on a one-second tick, so throughput stays fresh even while the
//! channel is starved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::accelerator::{Accelerator, SyncPolicy};
use crate::channel::{Transfer, TransferReceiver};
use crate::error::{DeviceError, FloodError, FloodResult};
use crate::state::{throughput_mb_s, ProgressSample, RunOutcome, SharedRunState};

/// How often progress is republished when no chunk arrives.
const PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Throughput is withheld until the run is older than this.
const THROUGHPUT_WARMUP: Duration = Duration::from_secs(1);

/// Drains one run's channel into the sink.
pub struct Consumer {
    run_id: u64,
    state: SharedRunState,
    accelerator: Option<Box<dyn Accelerator>>,
    sync_policy: SyncPolicy,
    files_completed: Arc<AtomicU64>,
    cancel: CancellationToken,
    progress: ProgressSample,
    bytes_since_sync: u64,
}

impl Consumer {
    pub fn new(run_id: u64, state: SharedRunState, cancel: CancellationToken) -> Self {
        Self {
            run_id,
            state,
            accelerator: None,
            sync_policy: SyncPolicy::default(),
            files_completed: Arc::new(AtomicU64::new(0)),
            cancel,
            progress: ProgressSample::default(),
            bytes_since_sync: 0,
        }
    }

    /// Stage chunks into `accelerator` before crediting them.
    pub fn with_accelerator(mut self, accelerator: Box<dyn Accelerator>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Counter of fully read files maintained by the producer pool.
    pub fn with_file_counter(mut self, files_completed: Arc<AtomicU64>) -> Self {
        self.files_completed = files_completed;
        self
    }

    /// Drain until end-of-stream, then publish the final outcome.
    ///
    /// `started` is the instant the run began; all rates are measured from it.
    pub async fn run(mut self, mut rx: TransferReceiver, started: Instant) -> FloodResult<RunOutcome> {
        let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = rx.pop() => match next {
                    Some(Transfer::Chunk(chunk)) => {
                        self.absorb(chunk).await;
                        self.publish(started);
                    }
                    Some(Transfer::EndOfStream) => break,
                    None => return Err(FloodError::ChannelClosed),
                },
                _ = ticker.tick() => self.publish(started),
            }
        }

        self.final_sync().await;
        let duration = started.elapsed();
        self.refresh(started);

        let outcome = RunOutcome {
            progress: self.progress,
            duration_sec: duration.as_secs_f64(),
            cancelled: self.cancel.is_cancelled(),
        };
        self.state.complete(self.run_id, &outcome)?;

        tracing::info!(
            run_id = self.run_id,
            bytes = outcome.progress.total_bytes,
            chunks = outcome.progress.chunks_transferred,
            duration_sec = outcome.duration_sec,
            throughput_mb_s = throughput_mb_s(outcome.progress.total_bytes, outcome.duration_sec),
            device_failures = outcome.progress.device_failures,
            cancelled = outcome.cancelled,
            "Benchmark finished"
        );

        Ok(outcome)
    }

    async fn absorb(&mut self, chunk: Bytes) {
        let len = chunk.len() as u64;

        if self.accelerator.is_some() {
            let stage = move |device: &mut dyn Accelerator| device.stage(&chunk);
            let staged = self
                .on_device(stage, |e| DeviceError::TransferFailed {
                    reason: format!("staging task panicked: {}", e),
                })
                .await;
            match staged {
                Some(Ok(())) => {
                    self.bytes_since_sync += len;
                    if self.sync_policy.due(self.bytes_since_sync) {
                        self.synchronize().await;
                    }
                }
                Some(Err(e)) => {
                    // Not fatal: the chunk still counts toward host throughput.
                    tracing::warn!(run_id = self.run_id, error = %e, "Accelerator staging failed");
                    self.progress.device_failures += 1;
                }
                None => {}
            }
        }

        self.progress.total_bytes += len;
        self.progress.chunks_transferred += 1;
    }

    async fn synchronize(&mut self) {
        let sync = |device: &mut dyn Accelerator| device.synchronize();
        let synced = self
            .on_device(sync, |e| DeviceError::SynchronizeFailed {
                reason: format!("synchronize task panicked: {}", e),
            })
            .await;
        if let Some(Err(e)) = synced {
            tracing::warn!(run_id = self.run_id, error = %e, "Accelerator synchronize failed");
            self.progress.device_failures += 1;
        }
        self.bytes_since_sync = 0;
    }

    async fn final_sync(&mut self) {
        if self.bytes_since_sync > 0 {
            self.synchronize().await;
        }
    }

    /// Run a blocking device call on the blocking pool, off the async workers.
    ///
    /// Returns `None` without an accelerator. A panicking call loses the
    /// device for the rest of the run and is reported through `on_panic`.
    async fn on_device<F>(
        &mut self,
        call: F,
        on_panic: impl FnOnce(JoinError) -> DeviceError,
    ) -> Option<Result<(), DeviceError>>
    where
        F: FnOnce(&mut dyn Accelerator) -> Result<(), DeviceError> + Send + 'static,
    {
        let mut device = self.accelerator.take()?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = call(device.as_mut());
            (device, result)
        })
        .await;

        match joined {
            Ok((device, result)) => {
                self.accelerator = Some(device);
                Some(result)
            }
            Err(e) => {
                let err = on_panic(e);
                tracing::error!(run_id = self.run_id, error = %err, "Accelerator lost");
                Some(Err(err))
            }
        }
    }

    fn refresh(&mut self, started: Instant) {
        self.progress.files_processed = self.files_completed.load(Ordering::Acquire);
        if let Some(device) = self.accelerator.as_ref() {
            self.progress.device_memory_bytes = device.memory_used_bytes();
        }

        let elapsed = started.elapsed();
        if elapsed > THROUGHPUT_WARMUP {
            self.progress.throughput_mb_s =
                Some(throughput_mb_s(self.progress.total_bytes, elapsed.as_secs_f64()));
        }
    }

    fn publish(&mut self, started: Instant) {
        self.refresh(started);
        self.state.record_progress(self.run_id, &self.progress);
    }
}
