// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `floodgate run` command - One benchmark in-process.
//!
//! Prints the report document to stdout; logs go to stderr.

use std::path::Path;

use floodgate_core::{BenchmarkService, ConfigLoader, ConfigOverrides, Report, RunPhase};

pub async fn execute(
    config_path: Option<&Path>,
    synthetic_gb: Option<f64>,
    chunk_mb: Option<u64>,
    threads: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load(config_path)?;

    let overrides = ConfigOverrides {
        synthetic_size_gb: synthetic_gb,
        use_synthetic: synthetic_gb.map(|_| true),
        chunk_size_mb: chunk_mb,
        threads,
        ..Default::default()
    };

    let service = BenchmarkService::new(config.run);
    let state = service.run_to_completion(&overrides).await?;
    let failed = state.status == RunPhase::Error;

    let report = Report::new(state);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
