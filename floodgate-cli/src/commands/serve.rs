// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `floodgate serve` command - Serve the HTTP control API.

use std::path::Path;

use floodgate_core::{BenchmarkService, ConfigLoader, ConfigOverrides, Port};

use crate::api;

pub async fn execute(
    config_path: Option<&Path>,
    port: Option<u16>,
    auto_start: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Fail fast on invalid configuration
    let config = ConfigLoader::load(config_path)?;
    let port = match port {
        Some(port) => Port::new(port)?,
        None => config.listen_port,
    };

    tracing::info!(
        port = %port,
        mode = ?config.run.source_mode,
        source = %config.run.source_path().display(),
        accelerator = config.run.gpu_available,
        "Configuration loaded"
    );

    let service = BenchmarkService::new(config.run);

    if auto_start || config.auto_start {
        let run_id = api::launch(&service, &ConfigOverrides::default())?;
        tracing::info!(run_id, "Auto-started benchmark");
    }

    api::serve(port, service.clone()).await?;

    if let Ok(run_id) = service.stop() {
        tracing::info!(run_id, "Cancelled active run on shutdown");
    }
    Ok(())
}
