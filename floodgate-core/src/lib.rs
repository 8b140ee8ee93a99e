//! Floodgate Core Library
//!
//! Measures how fast data moves from a storage source (files or synthetic
//! bytes) into a sink (host memory or accelerator memory). Provides the run
//! state machine, layered configuration, source enumeration, the bounded
//! producer/consumer pipeline and the service that launches runs.

pub mod accelerator;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod error;
pub mod pipeline;
pub mod producer;
pub mod report;
pub mod service;
pub mod source;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use accelerator::{Accelerator, StagingArena, SyncPolicy};
pub use config::{ConfigLoader, ConfigOverrides, RunConfiguration, ServiceConfig, SourceMode};
pub use error::{DeviceError, FloodError, FloodResult, HardValidationError};
pub use report::Report;
pub use service::{AcceleratorFactory, BenchmarkService, StartedRun};
pub use state::{Metrics, RunPhase, RunState, SharedRunState};
pub use types::{ChunkSize, Port, WorkerCount, GIB, MIB};
