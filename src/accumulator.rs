//! Rotation accumulator with crossing/threshold detection and drift snap.
//!
//! [`RotationAccumulator`] owns the [`RotationState`] record. Every write to
//! `total_degrees` goes through one of four doors:
//!
//! - [`RotationAccumulator::apply_delta`] from the motion classifier
//! - [`RotationAccumulator::snap`] when the mount settles at home
//! - [`RotationAccumulator::set_maneuver_total`] while the unwind maneuver
//!   holds suppression
//! - [`RotationAccumulator::reset`]
//!
//! The accumulator itself is not synchronized; the engine serializes access.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::{whole_wraps, RotationState, WrapSettings};

/// Something the accumulator did that consumers may want to hear about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccumulatorEvent {
    /// A new whole-rotation multiple was crossed.
    Crossing {
        /// Signed boundary crossed, e.g. `-720.0`.
        boundary_degrees: f64,
        /// Wrap count after the crossing.
        wrap_count: u32,
    },
    /// `|total|` reached the warning threshold. Fires once per reset.
    ThresholdExceeded {
        /// Accumulated rotation at the breach.
        total_degrees: f64,
        /// Threshold in effect.
        threshold_degrees: f64,
    },
    /// Drift correction at home.
    Snapped {
        /// Value before the snap.
        from_degrees: f64,
        /// Whole-rotation value after the snap.
        to_degrees: f64,
    },
    /// Accumulator zeroed.
    Reset {
        /// History note written with the reset.
        note: String,
    },
}

/// The signed accumulator and its bookkeeping.
#[derive(Debug, Clone)]
pub struct RotationAccumulator {
    state: RotationState,
    settings: WrapSettings,
    retention: Duration,
    snap_epsilon_deg: f64,
}

impl RotationAccumulator {
    /// Wrap a loaded (or default) state record.
    pub fn new(
        state: RotationState,
        settings: WrapSettings,
        retention: Duration,
        snap_epsilon_deg: f64,
    ) -> Self {
        Self {
            state,
            settings: settings.sanitized(),
            retention,
            snap_epsilon_deg,
        }
    }

    /// Current record.
    pub fn state(&self) -> &RotationState {
        &self.state
    }

    /// Current user settings.
    pub fn settings(&self) -> WrapSettings {
        self.settings
    }

    /// Signed cumulative rotation.
    pub fn total_degrees(&self) -> f64 {
        self.state.total_degrees
    }

    /// Warning threshold in degrees.
    pub fn threshold_degrees(&self) -> f64 {
        self.settings.threshold_degrees()
    }

    /// Azimuth baseline.
    pub fn azimuth_baseline(&self) -> Option<f64> {
        self.state.last_known_azimuth
    }

    /// Replace the azimuth baseline.
    pub fn set_azimuth_baseline(&mut self, azimuth: Option<f64>) {
        self.state.last_known_azimuth = azimuth;
    }

    /// RA baseline.
    pub fn ra_baseline(&self) -> Option<f64> {
        self.state.last_known_ra
    }

    /// Replace the RA baseline.
    pub fn set_ra_baseline(&mut self, ra_hours: Option<f64>) {
        self.state.last_known_ra = ra_hours;
    }

    /// Forget both baselines.
    pub fn clear_baselines(&mut self) {
        self.state.last_known_azimuth = None;
        self.state.last_known_ra = None;
    }

    /// Drop history entries that have aged out.
    pub fn prune_history(&mut self, now: DateTime<Utc>) {
        self.state.prune_history(now, self.retention);
    }

    /// Append a free-form note to the history.
    pub fn record(&mut self, now: DateTime<Utc>, note: impl Into<String>) {
        self.state.record(now, note, self.retention);
    }

    /// Add `degrees` to the total and evaluate crossings and the threshold.
    pub fn apply_delta(&mut self, degrees: f64, now: DateTime<Utc>) -> Vec<AccumulatorEvent> {
        if !degrees.is_finite() {
            warn!(degrees, "Ignoring non-finite rotation delta");
            return Vec::new();
        }
        self.state.total_degrees += degrees;
        self.evaluate(now)
    }

    /// Check for new crossings and a first threshold breach.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<AccumulatorEvent> {
        let mut events = Vec::new();
        let total = self.state.total_degrees;
        let sign = if total < 0.0 { -1.0 } else { 1.0 };

        let wrap_count = whole_wraps(total);
        while self.state.last_logged_wrap_count < wrap_count {
            self.state.last_logged_wrap_count += 1;
            let crossed = self.state.last_logged_wrap_count;
            let boundary = sign * f64::from(crossed) * 360.0;
            info!(boundary, total, "Cable wrap crossed a full rotation");
            self.state
                .record(now, format!("Crossed {boundary:+.0}°"), self.retention);
            events.push(AccumulatorEvent::Crossing {
                boundary_degrees: boundary,
                wrap_count: crossed,
            });
        }

        let threshold = self.threshold_degrees();
        if total.abs() >= threshold && !self.state.alert_fired {
            self.state.alert_fired = true;
            warn!(
                total,
                threshold, "Cable wrap threshold exceeded; consider unwinding"
            );
            self.state.record(
                now,
                format!("Warning threshold {threshold:.0}° exceeded at {total:+.1}°"),
                self.retention,
            );
            events.push(AccumulatorEvent::ThresholdExceeded {
                total_degrees: total,
                threshold_degrees: threshold,
            });
        }

        events
    }

    /// Round the total to the nearest whole rotation.
    ///
    /// Only valid at a known reference position. Returns nothing when the
    /// residual is already below the snap epsilon. Otherwise the
    /// [`AccumulatorEvent::Snapped`] event comes first, followed by any
    /// crossing or threshold alert the new value reaches.
    pub fn snap(&mut self, now: DateTime<Utc>) -> Vec<AccumulatorEvent> {
        let total = self.state.total_degrees;
        let snapped = (total / 360.0).round() * 360.0;
        let correction = snapped - total;
        if correction.abs() < self.snap_epsilon_deg {
            return Vec::new();
        }

        self.state.total_degrees = snapped;
        if snapped.abs() < self.threshold_degrees() {
            self.state.alert_fired = false;
        }

        info!(from = total, to = snapped, "Snapped rotation at home");
        self.state.record(
            now,
            format!("Snapped to {snapped:+.0}° at home ({correction:+.1}° drift correction)"),
            self.retention,
        );

        let mut events = vec![AccumulatorEvent::Snapped {
            from_degrees: total,
            to_degrees: snapped,
        }];
        events.extend(self.evaluate(now));
        events
    }

    /// Zero everything except user settings and history, then log `note`.
    pub fn reset(&mut self, now: DateTime<Utc>, note: &str) -> AccumulatorEvent {
        info!(previous = self.state.total_degrees, note, "Rotation reset");
        self.state.total_degrees = 0.0;
        self.state.alert_fired = false;
        self.state.last_logged_wrap_count = 0;
        self.state.zero_set_at = now;
        self.clear_baselines();
        self.state.record(now, note, self.retention);
        AccumulatorEvent::Reset {
            note: note.to_string(),
        }
    }

    /// Overwrite the total with the maneuver's own bookkeeping.
    ///
    /// No crossing or threshold evaluation: the maneuver only ever moves the
    /// total toward zero.
    pub fn set_maneuver_total(&mut self, degrees: f64) {
        self.state.total_degrees = degrees;
    }

    /// Replace user settings and re-check the threshold against them.
    pub fn set_settings(&mut self, settings: WrapSettings, now: DateTime<Utc>) -> Vec<AccumulatorEvent> {
        self.settings = settings.sanitized();
        self.evaluate(now)
    }
}
