// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Layered configuration with strict validation.
//!
//! Precedence, lowest to highest: built-in defaults, an optional YAML file,
//! then process environment variables. Everything is validated once at boot;
//! any invalid field results in a HardValidationError that prevents startup.
//!
//! Per-run changes arrive as [`ConfigOverrides`] and are merged onto the base
//! [`RunConfiguration`] to produce a new snapshot. The base is never mutated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::accelerator;
use crate::error::{FloodError, FloodResult, HardValidationError};
use crate::types::{gb_to_bytes, ChunkSize, Port, WorkerCount, MIB};

const DEFAULT_MOUNT_PATH: &str = "/mnt/data";
const DEFAULT_MODEL_FILE: &str = "model.bin";
const DEFAULT_SYNTHETIC_SIZE_GB: f64 = 10.0;
const DEFAULT_CHUNK_SIZE_MB: u64 = 100;
const DEFAULT_THREADS: usize = 4;
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ACCELERATOR_MEMORY_MB: u64 = 16 * 1024;

/// Where the measured bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Generated in memory; no storage is touched.
    Synthetic,
    /// Read from the file or directory at `mount_path/model_file`.
    Filesystem,
}

/// Immutable snapshot of everything one run needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfiguration {
    pub source_mode: SourceMode,
    pub mount_path: PathBuf,
    pub model_file: String,
    pub synthetic_size_bytes: u64,
    pub chunk_size: ChunkSize,
    pub threads: WorkerCount,
    pub channel_capacity: usize,
    pub gpu_available: bool,
    pub accelerator_memory_bytes: u64,
}

impl RunConfiguration {
    /// The file or directory a filesystem run reads from.
    pub fn source_path(&self) -> PathBuf {
        self.mount_path.join(&self.model_file)
    }

    /// Merge per-run overrides onto this configuration.
    ///
    /// Returns a fresh snapshot; `self` is left untouched.
    pub fn with_overrides(
        &self,
        overrides: &ConfigOverrides,
    ) -> Result<RunConfiguration, HardValidationError> {
        let mut next = self.clone();

        if let Some(use_synthetic) = overrides.use_synthetic {
            next.source_mode = if use_synthetic {
                SourceMode::Synthetic
            } else {
                SourceMode::Filesystem
            };
        }
        if let Some(gb) = overrides.synthetic_size_gb {
            next.synthetic_size_bytes = gb_to_bytes(gb)?;
        }
        if let Some(mb) = overrides.chunk_size_mb {
            next.chunk_size = ChunkSize::from_mb(mb)?;
        }
        if let Some(threads) = overrides.threads {
            next.threads = WorkerCount::new(threads)?;
            // Capacity tracks the worker count unless it was pinned explicitly.
            if overrides.channel_capacity.is_none() {
                next.channel_capacity = default_channel_capacity(next.threads);
            }
        }
        if let Some(capacity) = overrides.channel_capacity {
            next.channel_capacity = validate_capacity(capacity)?;
        }
        if let Some(model_file) = &overrides.model_file {
            if model_file.is_empty() {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "model_file",
                    value: String::new(),
                    reason: "Model file name cannot be empty".to_string(),
                });
            }
            next.model_file = model_file.clone();
        }

        Ok(next)
    }
}

/// Optional per-request changes accepted by the start trigger.
///
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigOverrides {
    pub synthetic_size_gb: Option<f64>,
    pub use_synthetic: Option<bool>,
    pub chunk_size_mb: Option<u64>,
    pub threads: Option<usize>,
    pub model_file: Option<String>,
    pub channel_capacity: Option<usize>,
}

impl ConfigOverrides {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Validated process-wide configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_port: Port,
    pub auto_start: bool,
    pub run: RunConfiguration,
}

/// Raw configuration as parsed from YAML or the environment (before validation).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    mount_path: Option<String>,
    model_file: Option<String>,
    use_synthetic: Option<bool>,
    synthetic_size_gb: Option<f64>,
    chunk_size_mb: Option<u64>,
    threads: Option<usize>,
    channel_capacity: Option<usize>,
    port: Option<u16>,
    auto_start: Option<bool>,
    accelerator_memory_mb: Option<u64>,
    force_accelerator: Option<bool>,
}

impl RawConfig {
    /// Layer `higher` on top of `self`; fields set in `higher` win.
    fn merge(self, higher: RawConfig) -> RawConfig {
        RawConfig {
            mount_path: higher.mount_path.or(self.mount_path),
            model_file: higher.model_file.or(self.model_file),
            use_synthetic: higher.use_synthetic.or(self.use_synthetic),
            synthetic_size_gb: higher.synthetic_size_gb.or(self.synthetic_size_gb),
            chunk_size_mb: higher.chunk_size_mb.or(self.chunk_size_mb),
            threads: higher.threads.or(self.threads),
            channel_capacity: higher.channel_capacity.or(self.channel_capacity),
            port: higher.port.or(self.port),
            auto_start: higher.auto_start.or(self.auto_start),
            accelerator_memory_mb: higher.accelerator_memory_mb.or(self.accelerator_memory_mb),
            force_accelerator: higher.force_accelerator.or(self.force_accelerator),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the full service configuration.
    ///
    /// Reads the optional YAML file, layers the process environment on top,
    /// probes for an accelerator and validates the result.
    pub fn load(path: Option<&Path>) -> FloodResult<ServiceConfig> {
        let file = match path {
            Some(path) => Self::read_file(path)?,
            None => RawConfig::default(),
        };
        let env = Self::parse_env(std::env::vars())?;
        let raw = file.merge(env);
        let gpu_available = accelerator::probe(raw.force_accelerator.unwrap_or(false));
        Self::validate(raw, gpu_available)
    }

    /// Load and validate configuration from a YAML file, without the environment.
    pub fn load_file(path: impl AsRef<Path>) -> FloodResult<ServiceConfig> {
        let raw = Self::read_file(path.as_ref())?;
        let gpu_available = raw.force_accelerator.unwrap_or(false);
        Self::validate(raw, gpu_available)
    }

    /// Load and validate configuration from a YAML string.
    ///
    /// The accelerator flag comes from `force_accelerator` only; no probing.
    pub fn load_string(content: &str) -> FloodResult<ServiceConfig> {
        let raw = Self::parse_yaml(content)?;
        let gpu_available = raw.force_accelerator.unwrap_or(false);
        Self::validate(raw, gpu_available)
    }

    /// Load and validate configuration from explicit environment pairs.
    ///
    /// The accelerator flag comes from `FORCE_ACCELERATOR` only; no probing.
    pub fn from_env_vars<I>(vars: I) -> FloodResult<ServiceConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw = Self::parse_env(vars)?;
        let gpu_available = raw.force_accelerator.unwrap_or(false);
        Self::validate(raw, gpu_available)
    }

    fn read_file(path: &Path) -> FloodResult<RawConfig> {
        if !path.exists() {
            return Err(FloodError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| FloodError::io("reading config file", path, e))?;

        Self::parse_yaml(&content)
    }

    fn parse_yaml(content: &str) -> FloodResult<RawConfig> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(RawConfig::default());
        }
        serde_yaml::from_str(content).map_err(|e| FloodError::ConfigParse {
            message: format!("YAML parse error: {}", e),
        })
    }

    fn parse_env<I>(vars: I) -> FloodResult<RawConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut raw = RawConfig::default();

        for (key, value) in vars {
            match key.as_str() {
                "MOUNT_PATH" => raw.mount_path = Some(value),
                "MODEL_FILE" => raw.model_file = Some(value),
                "USE_SYNTHETIC" => raw.use_synthetic = Some(parse_bool("USE_SYNTHETIC", &value)?),
                "SYNTHETIC_SIZE_GB" => {
                    raw.synthetic_size_gb = Some(parse_number("SYNTHETIC_SIZE_GB", &value)?)
                }
                "CHUNK_SIZE_MB" => raw.chunk_size_mb = Some(parse_number("CHUNK_SIZE_MB", &value)?),
                "NUM_THREADS" => raw.threads = Some(parse_number("NUM_THREADS", &value)?),
                "CHANNEL_CAPACITY" => {
                    raw.channel_capacity = Some(parse_number("CHANNEL_CAPACITY", &value)?)
                }
                "PORT" => raw.port = Some(parse_number("PORT", &value)?),
                "AUTO_START" => raw.auto_start = Some(parse_bool("AUTO_START", &value)?),
                "ACCELERATOR_MEMORY_MB" => {
                    raw.accelerator_memory_mb = Some(parse_number("ACCELERATOR_MEMORY_MB", &value)?)
                }
                "FORCE_ACCELERATOR" => {
                    raw.force_accelerator = Some(parse_bool("FORCE_ACCELERATOR", &value)?)
                }
                _ => {}
            }
        }

        Ok(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig, gpu_available: bool) -> FloodResult<ServiceConfig> {
        let listen_port = Port::new(raw.port.unwrap_or(DEFAULT_PORT))?;

        let mount_path = raw
            .mount_path
            .unwrap_or_else(|| DEFAULT_MOUNT_PATH.to_string());
        if mount_path.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "mount_path",
                value: mount_path,
                reason: "Mount path cannot be empty".to_string(),
            }
            .into());
        }

        let model_file = raw
            .model_file
            .unwrap_or_else(|| DEFAULT_MODEL_FILE.to_string());

        let synthetic_size_bytes =
            gb_to_bytes(raw.synthetic_size_gb.unwrap_or(DEFAULT_SYNTHETIC_SIZE_GB))?;
        let chunk_size = ChunkSize::from_mb(raw.chunk_size_mb.unwrap_or(DEFAULT_CHUNK_SIZE_MB))?;
        let threads = WorkerCount::new(raw.threads.unwrap_or(DEFAULT_THREADS))?;
        let channel_capacity = match raw.channel_capacity {
            Some(capacity) => validate_capacity(capacity)?,
            None => default_channel_capacity(threads),
        };

        let accelerator_memory_mb = raw
            .accelerator_memory_mb
            .unwrap_or(DEFAULT_ACCELERATOR_MEMORY_MB);
        if accelerator_memory_mb == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "accelerator_memory_mb",
                value: "0".to_string(),
                reason: "Accelerator memory budget must be greater than 0".to_string(),
            }
            .into());
        }

        let source_mode = if raw.use_synthetic.unwrap_or(false) {
            SourceMode::Synthetic
        } else {
            SourceMode::Filesystem
        };

        Ok(ServiceConfig {
            listen_port,
            auto_start: raw.auto_start.unwrap_or(false),
            run: RunConfiguration {
                source_mode,
                mount_path: PathBuf::from(mount_path),
                model_file,
                synthetic_size_bytes,
                chunk_size,
                threads,
                channel_capacity,
                gpu_available,
                accelerator_memory_bytes: accelerator_memory_mb.saturating_mul(MIB),
            },
        })
    }
}

/// Default channel capacity: two in-flight chunks per producer worker.
pub fn default_channel_capacity(threads: WorkerCount) -> usize {
    threads.value() * 2
}

fn validate_capacity(capacity: usize) -> Result<usize, HardValidationError> {
    if capacity == 0 {
        return Err(HardValidationError::InvalidFieldValue {
            field: "channel_capacity",
            value: "0".to_string(),
            reason: "Channel capacity must be at least 1".to_string(),
        });
    }
    Ok(capacity)
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, HardValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(HardValidationError::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason: "Expected a boolean (true/false)".to_string(),
        }),
    }
}

fn parse_number<T>(field: &'static str, value: &str) -> Result<T, HardValidationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| HardValidationError::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
