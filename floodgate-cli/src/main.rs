// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Floodgate CLI
//!
//! Command-line interface and HTTP control surface for the Floodgate
//! storage-to-memory throughput benchmark.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod api;
mod commands;
mod metrics;

/// Floodgate - storage to memory throughput benchmark
#[derive(Parser)]
#[command(name = "floodgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (YAML); environment variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP control API
    Serve {
        /// Listen port (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Start one benchmark as soon as the server is up
        #[arg(long)]
        auto_start: bool,
    },

    /// Run one benchmark in-process and print the report
    Run {
        /// Synthetic data size in GB (implies synthetic mode)
        #[arg(long)]
        synthetic_gb: Option<f64>,

        /// Chunk size in MB
        #[arg(long)]
        chunk_mb: Option<u64>,

        /// Number of producer workers
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Validate and print the resolved configuration
    Validate,

    /// Show the run record of a running server
    Status {
        /// Base URL of the server
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port, auto_start } => {
            commands::serve::execute(config, port, auto_start).await
        }
        Commands::Run {
            synthetic_gb,
            chunk_mb,
            threads,
        } => commands::run::execute(config, synthetic_gb, chunk_mb, threads).await,
        Commands::Validate => commands::validate::execute(config).await,
        Commands::Status { url } => commands::status::execute(&url).await,
    }
}
