// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `floodgate validate` command - Print the resolved configuration.

use std::path::Path;

use floodgate_core::{ConfigLoader, SourceMode, GIB, MIB};

pub async fn execute(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = ?config_path, "Validating configuration");

    match ConfigLoader::load(config_path) {
        Ok(config) => {
            let run = &config.run;
            println!("✓ Configuration is valid");
            println!();
            println!("Service:");
            println!("  Listen Port:        {}", config.listen_port);
            println!("  Auto Start:         {}", config.auto_start);
            println!();
            println!("Run Defaults:");
            match run.source_mode {
                SourceMode::Synthetic => println!(
                    "  Source:             synthetic ({:.2} GB)",
                    run.synthetic_size_bytes as f64 / GIB as f64
                ),
                SourceMode::Filesystem => {
                    println!("  Source:             {}", run.source_path().display())
                }
            }
            println!("  Chunk Size:         {}", run.chunk_size);
            println!("  Workers:            {}", run.threads);
            println!("  Channel Capacity:   {}", run.channel_capacity);
            if run.gpu_available {
                println!(
                    "  Accelerator:        yes ({} MB)",
                    run.accelerator_memory_bytes / MIB
                );
            } else {
                println!("  Accelerator:        no");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
