// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for Floodgate.
//!
//! Explicit enum error types only. No `Box<dyn Error>` and no `anyhow::Result`
//! in library code: every failure a run can hit has its own variant.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the benchmark pipeline and its configuration.
#[derive(Debug, Error)]
pub enum FloodError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Source Errors - Raised Before Any Producer Starts
    // =========================================================================
    #[error("Source not found: {path}")]
    SourceNotFound { path: PathBuf },

    // =========================================================================
    // Run Lifecycle Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Already running")]
    Busy,

    #[error("Not running")]
    NotRunning,

    // =========================================================================
    // Pipeline Errors - Abort the Whole Run
    // =========================================================================
    #[error("Transfer channel closed before end of stream")]
    ChannelClosed,

    #[error("Pipeline task failed: {reason}")]
    TaskFailed { reason: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} ({path}) - {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FloodError {
    /// Build an IO error tagged with the path that caused it.
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

/// Hard validation errors reject a configuration before anything runs.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Chunk size out of bounds: {bytes} bytes (min: {min}, max: {max})")]
    ChunkSizeOutOfBounds { bytes: u64, min: u64, max: u64 },

    #[error("Worker count out of bounds: {count} (min: {min}, max: {max})")]
    WorkerCountOutOfBounds { count: usize, min: usize, max: usize },
}

/// State transition errors for the run lifecycle.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition run from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Accelerator errors. These are recoverable: the consumer logs them and
/// keeps draining, so they never become a run failure on their own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("Device transfer failed: {reason}")]
    TransferFailed { reason: String },

    #[error("Device synchronize failed: {reason}")]
    SynchronizeFailed { reason: String },
}

/// Result type alias using FloodError.
pub type FloodResult<T> = Result<T, FloodError>;
