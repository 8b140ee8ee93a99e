// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Point-in-time report document.

use chrono::Utc;
use serde::Serialize;

use crate::state::RunState;

/// `{timestamp, state}` as served by the report endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Unix seconds when the snapshot was taken.
    pub timestamp: f64,
    pub state: RunState,
}

impl Report {
    /// Stamp `state` with the current time.
    pub fn new(state: RunState) -> Self {
        Self {
            timestamp: unix_timestamp(),
            state,
        }
    }
}

/// Current wall-clock time as fractional Unix seconds.
pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
