// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Accelerator sink.
//!
//! The consumer optionally stages every chunk into device memory. Staging is
//! asynchronous: `stage` only queues the transfer, and `synchronize` blocks
//! until everything queued has landed. Failures come back as [`DeviceError`]
//! and are the caller's to absorb; running out of device memory is a
//! benchmark result, not a crash.

use std::path::Path;

use bytes::Bytes;

use crate::error::DeviceError;
use crate::types::GIB;

/// Device nodes whose presence means an accelerator is attached.
const DEVICE_NODES: &[&str] = &["/dev/nvidia0", "/dev/kfd"];

/// A device-memory sink for chunks.
pub trait Accelerator: Send {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Queue a host-to-device copy of `chunk`.
    fn stage(&mut self, chunk: &Bytes) -> Result<(), DeviceError>;

    /// Wait for every queued copy to complete.
    fn synchronize(&mut self) -> Result<(), DeviceError>;

    /// Peak device memory held by staged chunks, in bytes.
    fn memory_used_bytes(&self) -> u64;
}

/// Capability probe, run once at startup.
pub fn probe(force: bool) -> bool {
    if force {
        return true;
    }
    let found = DEVICE_NODES.iter().any(|node| Path::new(node).exists());
    tracing::debug!(found, "Accelerator probe");
    found
}

/// When the consumer forces a synchronization point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Synchronize after at least this many bytes since the last sync.
    pub interval_bytes: u64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            interval_bytes: GIB,
        }
    }
}

impl SyncPolicy {
    /// True once `bytes_since_sync` has reached the interval.
    pub fn due(&self, bytes_since_sync: u64) -> bool {
        bytes_since_sync >= self.interval_bytes.max(1)
    }
}

/// Built-in accelerator backend over a fixed device-memory budget.
///
/// `stage` holds a reference to the chunk as an in-flight transfer and
/// charges it against the budget. `synchronize` completes the transfers by
/// copying them into the arena, then releases their memory.
#[derive(Debug)]
pub struct StagingArena {
    capacity: u64,
    in_flight: Vec<Bytes>,
    in_flight_bytes: u64,
    peak_bytes: u64,
    arena: Vec<u8>,
    completed_bytes: u64,
}

impl StagingArena {
    /// Create an arena with `capacity` bytes of device memory.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            in_flight: Vec::new(),
            in_flight_bytes: 0,
            peak_bytes: 0,
            arena: Vec::new(),
            completed_bytes: 0,
        }
    }

    /// Bytes whose transfer has completed.
    pub fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    /// Bytes queued but not yet synchronized.
    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight_bytes
    }
}

impl Accelerator for StagingArena {
    fn name(&self) -> &str {
        "staging-arena"
    }

    fn stage(&mut self, chunk: &Bytes) -> Result<(), DeviceError> {
        let requested = chunk.len() as u64;
        let available = self.capacity.saturating_sub(self.in_flight_bytes);
        if requested > available {
            return Err(DeviceError::OutOfMemory {
                requested,
                available,
            });
        }

        self.in_flight.push(chunk.clone());
        self.in_flight_bytes += requested;
        self.peak_bytes = self.peak_bytes.max(self.in_flight_bytes);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<(), DeviceError> {
        for chunk in self.in_flight.drain(..) {
            // Reuse the arena allocation across syncs.
            self.arena.clear();
            self.arena.extend_from_slice(&chunk);
            self.completed_bytes += chunk.len() as u64;
        }
        self.in_flight_bytes = 0;
        Ok(())
    }

    fn memory_used_bytes(&self) -> u64 {
        self.peak_bytes
    }
}
