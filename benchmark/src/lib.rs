// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Floodgate Benchmarking Fixtures
//!
//! Shared setup for the criterion benches: run configurations, on-disk
//! model trees and a single-run driver.
//!
//! # Benchmark Categories
//!
//! - **Pipeline Throughput**: full runs over synthetic and file sources
//! - **Channel Backpressure**: raw channel push/pop at several capacities

use std::path::Path;

use floodgate_core::{
    BenchmarkService, ChunkSize, ConfigLoader, ConfigOverrides, FloodError, FloodResult,
    RunConfiguration, RunPhase, RunState, SourceMode, WorkerCount,
};
use tempfile::TempDir;

/// Synthetic-mode configuration with host memory as the sink.
pub fn synthetic_config(total_bytes: u64, chunk_bytes: u64) -> FloodResult<RunConfiguration> {
    let mut config = ConfigLoader::load_string("")?.run;
    config.source_mode = SourceMode::Synthetic;
    config.synthetic_size_bytes = total_bytes;
    config.chunk_size = ChunkSize::new(chunk_bytes)?;
    config.gpu_available = false;
    Ok(config)
}

/// Filesystem-mode configuration reading `root/model`.
pub fn filesystem_config(
    root: &Path,
    chunk_bytes: u64,
    workers: usize,
) -> FloodResult<RunConfiguration> {
    let mut config = ConfigLoader::load_string("")?.run;
    config.source_mode = SourceMode::Filesystem;
    config.mount_path = root.to_path_buf();
    config.model_file = "model".to_string();
    config.chunk_size = ChunkSize::new(chunk_bytes)?;
    config.threads = WorkerCount::new(workers)?;
    config.channel_capacity = workers * 2;
    config.gpu_available = false;
    Ok(config)
}

/// Temporary `model/` directory holding `files` files of `file_bytes` each.
pub fn model_tree(files: usize, file_bytes: usize) -> std::io::Result<TempDir> {
    let dir = TempDir::new()?;
    let model = dir.path().join("model");
    std::fs::create_dir_all(&model)?;
    let contents = vec![0xA5u8; file_bytes];
    for i in 0..files {
        std::fs::write(model.join(format!("shard-{:03}.bin", i)), &contents)?;
    }
    Ok(dir)
}

/// Run one benchmark to completion; errors if it did not complete.
pub async fn run_once(service: &BenchmarkService) -> FloodResult<RunState> {
    let state = service.run_to_completion(&ConfigOverrides::default()).await?;
    match state.status {
        RunPhase::Completed => Ok(state),
        _ => Err(FloodError::TaskFailed {
            reason: state.error.unwrap_or_else(|| "run did not complete".to_string()),
        }),
    }
}
