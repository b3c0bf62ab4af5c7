//! Bounded buffer of recent accumulator values for charting.
//!
//! This is a display aid only; nothing reads it back into the engine.

use chrono::{DateTime, Utc};
use ringbuf::{HeapRb, Rb};
use serde::Serialize;

/// One charted point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RotationPoint {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Accumulated rotation after the sample.
    pub total_degrees: f64,
}

/// Fixed-capacity ring that overwrites its oldest point when full.
pub struct DisplayBuffer {
    ring: HeapRb<RotationPoint>,
}

impl std::fmt::Debug for DisplayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayBuffer")
            .field("len", &self.ring.len())
            .finish()
    }
}

impl DisplayBuffer {
    /// Buffer holding at most `capacity` points (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    /// Append a point, dropping the oldest if full.
    pub fn push(&mut self, timestamp: DateTime<Utc>, total_degrees: f64) {
        self.ring.push_overwrite(RotationPoint {
            timestamp,
            total_degrees,
        });
    }

    /// Points oldest first.
    pub fn points(&self) -> Vec<RotationPoint> {
        self.ring.iter().copied().collect()
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.ring.len()
    }
}
