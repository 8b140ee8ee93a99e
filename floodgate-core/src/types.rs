// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Every knob that shapes a run is validated when it is constructed, so a
//! `RunConfiguration` built from these types is valid by construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;
/// One gibibyte.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Minimum allowed chunk size: 1 byte
const MIN_CHUNK_SIZE: u64 = 1;
/// Maximum allowed chunk size: 1 GiB
const MAX_CHUNK_SIZE: u64 = GIB;

/// Minimum producer worker count
const MIN_WORKERS: usize = 1;
/// Maximum producer worker count
const MAX_WORKERS: usize = 256;

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    /// Get the inner port value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Validated chunk size in bytes.
/// Must be between MIN_CHUNK_SIZE and MAX_CHUNK_SIZE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ChunkSize(u64);

impl ChunkSize {
    /// Create a new ChunkSize with bounds validation.
    pub fn new(bytes: u64) -> Result<Self, HardValidationError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&bytes) {
            return Err(HardValidationError::ChunkSizeOutOfBounds {
                bytes,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            });
        }
        Ok(Self(bytes))
    }

    /// Create from mebibytes for convenience.
    pub fn from_mb(mb: u64) -> Result<Self, HardValidationError> {
        Self::new(mb.saturating_mul(MIB))
    }

    /// Get the chunk size in bytes.
    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Get the chunk size as a buffer length.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % MIB == 0 {
            write!(f, "{}MB", self.0 / MIB)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

impl TryFrom<u64> for ChunkSize {
    type Error = HardValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChunkSize> for u64 {
    fn from(size: ChunkSize) -> Self {
        size.0
    }
}

/// Validated producer worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct WorkerCount(usize);

impl WorkerCount {
    /// Create a new WorkerCount with bounds validation.
    pub fn new(count: usize) -> Result<Self, HardValidationError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&count) {
            return Err(HardValidationError::WorkerCountOutOfBounds {
                count,
                min: MIN_WORKERS,
                max: MAX_WORKERS,
            });
        }
        Ok(Self(count))
    }

    /// Get the inner worker count.
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for WorkerCount {
    type Error = HardValidationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerCount> for usize {
    fn from(count: WorkerCount) -> Self {
        count.0
    }
}

/// Convert a fractional gigabyte figure (as operators type it) to bytes.
pub fn gb_to_bytes(gb: f64) -> Result<u64, HardValidationError> {
    if !gb.is_finite() || gb < 0.0 {
        return Err(HardValidationError::InvalidFieldValue {
            field: "synthetic_size_gb",
            value: gb.to_string(),
            reason: "Must be a finite, non-negative number".to_string(),
        });
    }
    Ok((gb * GIB as f64) as u64)
}
