//! Persisted records: the rotation accumulator, its event log, and the user
//! settings that survive a reset.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lowest accepted warning threshold, in rotations.
pub const MIN_THRESHOLD_ROTATIONS: f64 = 0.5;
/// Highest accepted warning threshold, in rotations.
pub const MAX_THRESHOLD_ROTATIONS: f64 = 3.0;
const DEFAULT_THRESHOLD_ROTATIONS: f64 = 1.5;

/// One entry in the wrap log. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapEvent {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Accumulated rotation at the time of the event.
    pub cumulative_degrees_at_event: f64,
    /// Human-readable description.
    pub note: String,
}

/// The accumulator record written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationState {
    /// Signed cumulative rotation; positive is winding.
    pub total_degrees: f64,
    /// RA baseline (hours) used while slewing.
    pub last_known_ra: Option<f64>,
    /// Azimuth baseline (degrees) used while tracking or stopped.
    pub last_known_azimuth: Option<f64>,
    /// Highest `floor(|total| / 360)` already written to the history.
    pub last_logged_wrap_count: u32,
    /// Threshold breach already surfaced since the last reset.
    pub alert_fired: bool,
    /// When the accumulator was last zeroed.
    pub zero_set_at: DateTime<Utc>,
    /// Time-pruned event log, oldest first.
    #[serde(default)]
    pub history: Vec<WrapEvent>,
}

impl RotationState {
    /// A fresh record zeroed at `now`.
    pub fn zeroed(now: DateTime<Utc>) -> Self {
        Self {
            total_degrees: 0.0,
            last_known_ra: None,
            last_known_azimuth: None,
            last_logged_wrap_count: 0,
            alert_fired: false,
            zero_set_at: now,
            history: Vec::new(),
        }
    }

    /// Append an event stamped `now`, then drop entries older than
    /// `retention`.
    ///
    /// Timestamps are clamped to the newest existing entry so the log stays
    /// ordered even if the clock steps backwards.
    pub fn record(&mut self, now: DateTime<Utc>, note: impl Into<String>, retention: Duration) {
        let timestamp = match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.history.push(WrapEvent {
            timestamp,
            cumulative_degrees_at_event: self.total_degrees,
            note: note.into(),
        });
        self.prune_history(timestamp, retention);
    }

    /// Drop history entries older than `now - retention`.
    pub fn prune_history(&mut self, now: DateTime<Utc>, retention: Duration) {
        let cutoff = now - retention;
        self.history.retain(|event| event.timestamp >= cutoff);
    }
}

/// `floor(|degrees| / 360)` as a count.
pub fn whole_wraps(degrees: f64) -> u32 {
    let wraps = (degrees.abs() / 360.0).floor();
    if wraps >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        wraps as u32
    }
}

/// User settings, persisted separately from [`RotationState`] so a reset
/// never loses them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WrapSettings {
    /// Warning threshold in rotations, within `[0.5, 3.0]`.
    pub warning_threshold_rotations: f64,
}

impl Default for WrapSettings {
    fn default() -> Self {
        Self {
            warning_threshold_rotations: DEFAULT_THRESHOLD_ROTATIONS,
        }
    }
}

impl WrapSettings {
    /// Settings with the threshold clamped into range.
    pub fn with_threshold(rotations: f64) -> Self {
        Self {
            warning_threshold_rotations: clamp_threshold(rotations),
        }
    }

    /// Clamp a value loaded from disk, which may have been hand-edited.
    pub fn sanitized(self) -> Self {
        Self::with_threshold(self.warning_threshold_rotations)
    }

    /// Threshold in degrees.
    pub fn threshold_degrees(&self) -> f64 {
        self.warning_threshold_rotations * 360.0
    }
}

/// Clamp a threshold to `[0.5, 3.0]` rotations; NaN maps to the default.
pub fn clamp_threshold(rotations: f64) -> f64 {
    if rotations.is_nan() {
        return DEFAULT_THRESHOLD_ROTATIONS;
    }
    rotations.clamp(MIN_THRESHOLD_ROTATIONS, MAX_THRESHOLD_ROTATIONS)
}
