//! Motion classifier: turns each position sample into a motion phase and the
//! rotation delta that phase implies.
//!
//! # Phases
//!
//! ```text
//!            !connected
//!   ┌──────────────────────────────┐
//!   ▼                              │
//! Disconnected ──slewing──► Slewing ──!slewing──► Tracking / Stopped
//!                             ▲                      │
//!                             └──────slewing─────────┘
//! ```
//!
//! - **Slewing** accumulates nothing tick by tick. It records the azimuth
//!   before the slew and commits `after - before` once the slew flag clears.
//!   Tick deltas are still computed (with spike rejection) but only logged as
//!   a cross-check; near the pole the azimuth rate blows up and per-tick sums
//!   drift badly.
//! - **Tracking** samples at a fixed interval and rejects jumps above a small
//!   cap, since organic sidereal drift is slow and anything larger is a
//!   re-solve or sync.
//! - **Stopped** reconciles whatever moved since the last baseline and, once
//!   the mount has sat at home for the settle time, snaps the accumulator to
//!   a whole rotation (once per arrival).
//! - **Disconnected** drops both baselines.
//!
//! While the unwind maneuver holds suppression the classifier keeps running
//! so its baselines follow the mount, but every delta, commit and snap is
//! discarded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::accumulator::{AccumulatorEvent, RotationAccumulator};
use crate::astro::{fold_degrees, fold_hours};
use crate::error::SensorArtifact;
use crate::sample::PositionSample;

/// Folded slew commits larger than this are checked against the confirmed
/// direction and unfolded if they disagree.
const AMBIGUOUS_FOLD_DEG: f64 = 150.0;

/// Tunables for the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Minimum spacing between accumulated tracking samples.
    pub tracking_sample_interval: Duration,
    /// Largest per-sample azimuth change accepted while tracking.
    pub tracking_spike_cap_deg: f64,
    /// Largest per-tick azimuth change accepted while slewing.
    pub slew_spike_cap_deg: f64,
    /// RA change needed before the slew direction is trusted.
    pub direction_confidence_hours: f64,
    /// Smallest stopped-phase delta worth applying.
    pub catch_up_min_deg: f64,
    /// Time the mount must sit at home before snapping.
    pub home_settle: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tracking_sample_interval: Duration::from_secs(5),
            tracking_spike_cap_deg: 2.0,
            slew_spike_cap_deg: 10.0,
            direction_confidence_hours: 0.05,
            catch_up_min_deg: 0.5,
            home_settle: Duration::from_secs(5),
        }
    }
}

/// Phase without its per-phase data, for display and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Mount not connected.
    Disconnected,
    /// Slew in progress.
    Slewing,
    /// Sidereal tracking.
    Tracking,
    /// Connected, not moving.
    Stopped,
}

impl PhaseKind {
    /// Short label.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Disconnected => "Disconnected",
            PhaseKind::Slewing => "Slewing",
            PhaseKind::Tracking => "Tracking",
            PhaseKind::Stopped => "Stopped",
        }
    }
}

/// Book-keeping for a slew in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct SlewProgress {
    /// `+1` clockwise (RA decreasing), `-1` counter-clockwise; `None` until
    /// the RA has moved far enough to tell.
    pub direction_sign: Option<f64>,
    /// RA when the slew began.
    pub pre_slew_ra: f64,
    /// Accumulated total when the slew began.
    pub pre_slew_total: f64,
    /// Azimuth the commit is measured from. `None` after a resync, in which
    /// case the slew is not committed.
    pub az_baseline: Option<f64>,
    tick_azimuth: f64,
    tick_sum: f64,
    rejected_ticks: u32,
}

/// Home-position watch while stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HomeWatch {
    /// Mount currently reports at-home.
    pub at_home: bool,
    /// When the current at-home stretch began.
    pub home_arrival_time: Option<DateTime<Utc>>,
    snapped: bool,
}

/// Current motion phase with the data only that phase needs.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionPhase {
    /// No connection; no baselines.
    Disconnected,
    /// Slewing.
    Slewing(SlewProgress),
    /// Tracking; remembers the last accumulated sample for rate limiting.
    Tracking {
        /// Timestamp of the last sample that was compared to the baseline.
        last_sampled_at: Option<DateTime<Utc>>,
    },
    /// Stopped, possibly at home.
    Stopped(HomeWatch),
}

impl MotionPhase {
    /// Discriminant only.
    pub fn kind(&self) -> PhaseKind {
        match self {
            MotionPhase::Disconnected => PhaseKind::Disconnected,
            MotionPhase::Slewing(_) => PhaseKind::Slewing,
            MotionPhase::Tracking { .. } => PhaseKind::Tracking,
            MotionPhase::Stopped(_) => PhaseKind::Stopped,
        }
    }

    /// One-line status for display consumers.
    pub fn describe(&self) -> String {
        match self {
            MotionPhase::Disconnected => "Disconnected".to_string(),
            MotionPhase::Slewing(progress) => match progress.direction_sign {
                Some(sign) if sign > 0.0 => "Slewing clockwise".to_string(),
                Some(_) => "Slewing counter-clockwise".to_string(),
                None => "Slewing (direction unconfirmed)".to_string(),
            },
            MotionPhase::Tracking { .. } => "Tracking".to_string(),
            MotionPhase::Stopped(watch) if watch.at_home && watch.snapped => {
                "Stopped at home".to_string()
            }
            MotionPhase::Stopped(watch) if watch.at_home => {
                "Stopped at home (settling)".to_string()
            }
            MotionPhase::Stopped(_) => "Stopped".to_string(),
        }
    }
}

/// What processing one sample did.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    /// Phase after the sample.
    pub phase: PhaseKind,
    /// Sum of deltas applied to the accumulator.
    pub applied_degrees: f64,
    /// Set if the sample (or one delta it produced) was rejected.
    pub rejected: Option<SensorArtifact>,
    /// Accumulator events raised while applying.
    pub events: Vec<AccumulatorEvent>,
}

impl SampleOutcome {
    fn new(phase: PhaseKind) -> Self {
        Self {
            phase,
            applied_degrees: 0.0,
            rejected: None,
            events: Vec::new(),
        }
    }
}

/// Per-sample inputs shared by the phase handlers.
struct Tick<'a> {
    sample: &'a PositionSample,
    azimuth: f64,
    now: DateTime<Utc>,
    suppressed: bool,
}

/// The motion state machine.
#[derive(Debug, Clone)]
pub struct MotionClassifier {
    phase: MotionPhase,
    config: ClassifierConfig,
    tracking_interval: chrono::Duration,
    home_settle: chrono::Duration,
}

impl MotionClassifier {
    /// New classifier starting in `Disconnected`.
    pub fn new(config: ClassifierConfig) -> Self {
        let tracking_interval = to_chrono(config.tracking_sample_interval);
        let home_settle = to_chrono(config.home_settle);
        Self {
            phase: MotionPhase::Disconnected,
            config,
            tracking_interval,
            home_settle,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &MotionPhase {
        &self.phase
    }

    /// Classify one sample and apply whatever delta it implies.
    ///
    /// With `suppressed` set the classifier advances its baselines but never
    /// touches the accumulated total.
    pub fn process(
        &mut self,
        sample: &PositionSample,
        acc: &mut RotationAccumulator,
        suppressed: bool,
    ) -> SampleOutcome {
        if let Err(artifact) = sample.validate() {
            warn!(%artifact, "Rejecting position sample");
            let mut out = SampleOutcome::new(self.phase.kind());
            out.rejected = Some(artifact);
            return out;
        }

        if !sample.connected {
            self.disconnect(acc);
            return SampleOutcome::new(PhaseKind::Disconnected);
        }

        let tick = Tick {
            sample,
            azimuth: sample.azimuth(),
            now: sample.timestamp,
            suppressed,
        };
        let mut out = SampleOutcome::new(PhaseKind::Disconnected);

        let previous = std::mem::replace(&mut self.phase, MotionPhase::Disconnected);
        let next = if sample.slewing {
            let progress = match previous {
                MotionPhase::Slewing(progress) => progress,
                other => {
                    debug!(from = other.kind().as_str(), "Entering slew");
                    self.begin_slew(&tick, acc)
                }
            };
            MotionPhase::Slewing(self.slew_tick(progress, &tick, acc, &mut out))
        } else {
            let (came_from, carried) = match previous {
                MotionPhase::Slewing(progress) => {
                    self.commit_slew(progress, &tick, acc, &mut out);
                    (PhaseKind::Slewing, None)
                }
                other => (other.kind(), Some(other)),
            };

            if sample.tracking_enabled {
                let last_sampled_at = match carried {
                    Some(MotionPhase::Tracking { last_sampled_at }) => last_sampled_at,
                    _ => {
                        debug!(from = came_from.as_str(), "Entering tracking");
                        None
                    }
                };
                MotionPhase::Tracking {
                    last_sampled_at: self.track(last_sampled_at, &tick, acc, &mut out),
                }
            } else {
                let (watch, entering) = match carried {
                    Some(MotionPhase::Stopped(watch)) => (watch, false),
                    _ => {
                        debug!(from = came_from.as_str(), "Entering stopped");
                        (HomeWatch::default(), true)
                    }
                };
                MotionPhase::Stopped(self.stop(watch, entering, &tick, acc, &mut out))
            }
        };

        out.phase = next.kind();
        self.phase = next;
        out
    }

    /// Forget baselines so motion made while suppressed is never counted.
    ///
    /// An in-progress slew keeps running but will not be committed.
    pub fn resync(&mut self, acc: &mut RotationAccumulator) {
        acc.clear_baselines();
        match &mut self.phase {
            MotionPhase::Slewing(progress) => progress.az_baseline = None,
            MotionPhase::Tracking { last_sampled_at } => *last_sampled_at = None,
            MotionPhase::Stopped(_) | MotionPhase::Disconnected => {}
        }
    }

    fn disconnect(&mut self, acc: &mut RotationAccumulator) {
        match &self.phase {
            MotionPhase::Disconnected => {}
            MotionPhase::Slewing(progress) => {
                warn!(
                    pre_slew_total = progress.pre_slew_total,
                    "Disconnected mid-slew; uncommitted slew dropped"
                );
            }
            other => info!(from = other.kind().as_str(), "Mount disconnected"),
        }
        acc.clear_baselines();
        self.phase = MotionPhase::Disconnected;
    }

    fn apply(
        &self,
        degrees: f64,
        reason: &'static str,
        tick: &Tick<'_>,
        acc: &mut RotationAccumulator,
        out: &mut SampleOutcome,
    ) {
        if tick.suppressed {
            debug!(degrees, reason, "Unwind in progress; delta discarded");
            return;
        }
        debug!(degrees, reason, "Applying rotation delta");
        out.applied_degrees += degrees;
        out.events.extend(acc.apply_delta(degrees, tick.now));
    }

    fn begin_slew(&self, tick: &Tick<'_>, acc: &mut RotationAccumulator) -> SlewProgress {
        let baseline = acc.azimuth_baseline().unwrap_or(tick.azimuth);
        acc.set_ra_baseline(Some(tick.sample.ra_hours));
        info!(
            ra = tick.sample.ra_hours,
            azimuth = baseline,
            "Slew started"
        );
        SlewProgress {
            direction_sign: None,
            pre_slew_ra: tick.sample.ra_hours,
            pre_slew_total: acc.total_degrees(),
            az_baseline: Some(baseline),
            tick_azimuth: baseline,
            tick_sum: 0.0,
            rejected_ticks: 0,
        }
    }

    fn slew_tick(
        &self,
        mut progress: SlewProgress,
        tick: &Tick<'_>,
        acc: &mut RotationAccumulator,
        out: &mut SampleOutcome,
    ) -> SlewProgress {
        let ra = tick.sample.ra_hours;
        if progress.direction_sign.is_none() {
            let ra_delta = fold_hours(ra - progress.pre_slew_ra);
            if ra_delta.abs() >= self.config.direction_confidence_hours {
                // Northern-hemisphere convention: RA decreasing is clockwise
                let sign = if ra_delta < 0.0 { 1.0 } else { -1.0 };
                debug!(ra_delta, sign, "Slew direction confirmed");
                progress.direction_sign = Some(sign);
            }
        }
        acc.set_ra_baseline(Some(ra));

        let delta = fold_degrees(tick.azimuth - progress.tick_azimuth);
        if delta.abs() > self.config.slew_spike_cap_deg {
            progress.rejected_ticks += 1;
            debug!(delta, "Slew tick rejected as waypoint spike");
            out.rejected = Some(SensorArtifact::SlewSpike {
                delta,
                cap: self.config.slew_spike_cap_deg,
            });
        } else {
            progress.tick_sum += delta;
        }
        progress.tick_azimuth = tick.azimuth;
        progress
    }

    fn commit_slew(
        &self,
        progress: SlewProgress,
        tick: &Tick<'_>,
        acc: &mut RotationAccumulator,
        out: &mut SampleOutcome,
    ) {
        acc.set_ra_baseline(None);
        let post = tick.azimuth;
        acc.set_azimuth_baseline(Some(post));

        let Some(pre) = progress.az_baseline else {
            info!(azimuth = post, "Slew finished after resync; nothing to commit");
            return;
        };

        let mut delta = fold_degrees(post - pre);
        if let Some(sign) = progress.direction_sign {
            if delta.abs() > AMBIGUOUS_FOLD_DEG && delta.signum() != sign {
                delta += 360.0 * sign;
            }
        }

        info!(
            delta,
            tick_sum = progress.tick_sum,
            rejected_ticks = progress.rejected_ticks,
            expected_total = progress.pre_slew_total + delta,
            "Slew finished"
        );
        self.apply(delta, "slew commit", tick, acc, out);
    }

    fn track(
        &self,
        last_sampled_at: Option<DateTime<Utc>>,
        tick: &Tick<'_>,
        acc: &mut RotationAccumulator,
        out: &mut SampleOutcome,
    ) -> Option<DateTime<Utc>> {
        acc.set_ra_baseline(None);

        if let Some(last) = last_sampled_at {
            let elapsed = tick.now - last;
            if elapsed >= chrono::Duration::zero() && elapsed < self.tracking_interval {
                return Some(last);
            }
        }

        match acc.azimuth_baseline() {
            None => acc.set_azimuth_baseline(Some(tick.azimuth)),
            Some(baseline) => {
                let delta = fold_degrees(tick.azimuth - baseline);
                if delta.abs() > self.config.tracking_spike_cap_deg {
                    warn!(
                        delta,
                        cap = self.config.tracking_spike_cap_deg,
                        "Tracking jump rejected; re-baselining"
                    );
                    out.rejected = Some(SensorArtifact::TrackingJump {
                        delta,
                        cap: self.config.tracking_spike_cap_deg,
                    });
                } else {
                    self.apply(delta, "tracking", tick, acc, out);
                }
                acc.set_azimuth_baseline(Some(tick.azimuth));
            }
        }
        Some(tick.now)
    }

    fn stop(
        &self,
        mut watch: HomeWatch,
        entering: bool,
        tick: &Tick<'_>,
        acc: &mut RotationAccumulator,
        out: &mut SampleOutcome,
    ) -> HomeWatch {
        acc.set_ra_baseline(None);

        match acc.azimuth_baseline() {
            None => acc.set_azimuth_baseline(Some(tick.azimuth)),
            Some(baseline) => {
                let delta = fold_degrees(tick.azimuth - baseline);
                if delta.abs() >= self.config.catch_up_min_deg {
                    let reason = if entering { "stop catch-up" } else { "stopped drift" };
                    self.apply(delta, reason, tick, acc, out);
                    acc.set_azimuth_baseline(Some(tick.azimuth));
                }
            }
        }

        if !tick.sample.at_home {
            if watch.at_home {
                debug!("Left home position");
            }
            return HomeWatch::default();
        }

        if !watch.at_home {
            info!("Arrived at home; waiting to settle");
            watch = HomeWatch {
                at_home: true,
                home_arrival_time: Some(tick.now),
                snapped: false,
            };
        }

        if let (false, Some(arrived)) = (watch.snapped, watch.home_arrival_time) {
            if tick.now - arrived >= self.home_settle {
                watch.snapped = true;
                if tick.suppressed {
                    debug!("Unwind in progress; home snap skipped");
                } else {
                    out.events.extend(acc.snap(tick.now));
                }
            }
        }
        watch
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::fixtures::*;
    use crate::state::{RotationState, WrapSettings};

    fn setup() -> (MotionClassifier, RotationAccumulator) {
        let acc = RotationAccumulator::new(
            RotationState::zeroed(t0()),
            WrapSettings::with_threshold(3.0),
            chrono::Duration::hours(1),
            0.01,
        );
        (MotionClassifier::new(ClassifierConfig::default()), acc)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_tracking_accumulates_small_drift() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 100.0), &mut acc, false);
        classifier.process(&tracking(5, 100.5), &mut acc, false);
        classifier.process(&tracking(10, 101.25), &mut acc, false);

        assert!(close(acc.total_degrees(), 1.25));
        assert_eq!(classifier.phase().kind(), PhaseKind::Tracking);
    }

    #[test]
    fn test_tracking_spike_rejected_and_rebaselined() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 100.0), &mut acc, false);
        let out = classifier.process(&tracking(5, 145.0), &mut acc, false);

        assert_eq!(acc.total_degrees(), 0.0);
        assert!(matches!(
            out.rejected,
            Some(SensorArtifact::TrackingJump { .. })
        ));
        assert_eq!(acc.azimuth_baseline(), Some(145.0));

        classifier.process(&tracking(10, 146.0), &mut acc, false);
        assert!(close(acc.total_degrees(), 1.0));
    }

    #[test]
    fn test_tracking_rate_limited() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 10.0), &mut acc, false);
        classifier.process(&tracking(1, 10.5), &mut acc, false);
        classifier.process(&tracking(2, 11.0), &mut acc, false);
        assert_eq!(acc.total_degrees(), 0.0);

        classifier.process(&tracking(5, 11.5), &mut acc, false);
        assert!(close(acc.total_degrees(), 1.5));
    }

    #[test]
    fn test_tracking_across_north() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 359.5), &mut acc, false);
        classifier.process(&tracking(5, 0.5), &mut acc, false);
        assert!(close(acc.total_degrees(), 1.0));
    }

    #[test]
    fn test_slew_commits_before_after_delta() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 10.0), &mut acc, false);
        // Waypoint spike mid-slew must not matter
        classifier.process(&slewing(1, 15.0), &mut acc, false);
        let spike = classifier.process(&slewing(2, 80.0), &mut acc, false);
        assert!(matches!(
            spike.rejected,
            Some(SensorArtifact::SlewSpike { .. })
        ));
        classifier.process(&slewing(3, 85.0), &mut acc, false);
        assert_eq!(acc.total_degrees(), 0.0);

        let out = classifier.process(&tracking(4, 90.0), &mut acc, false);
        assert!(close(out.applied_degrees, 80.0));
        assert!(close(acc.total_degrees(), 80.0));
        assert_eq!(acc.azimuth_baseline(), Some(90.0));
        assert!(acc.ra_baseline().is_none());
    }

    #[test]
    fn test_slew_direction_from_ra() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&sited(0, true, 23.98), &mut acc, false);
        assert!(matches!(
            classifier.phase(),
            MotionPhase::Slewing(SlewProgress {
                direction_sign: None,
                ..
            })
        ));
        // 23.98h -> 0.05h is +0.07h across the wrap: counter-clockwise
        classifier.process(&sited(1, true, 0.05), &mut acc, false);
        match classifier.phase() {
            MotionPhase::Slewing(progress) => assert_eq!(progress.direction_sign, Some(-1.0)),
            other => panic!("unexpected phase {other:?}"),
        }
        assert_eq!(acc.ra_baseline(), Some(0.05));
    }

    #[test]
    fn test_small_ra_change_leaves_direction_unknown() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&sited(0, true, 23.98), &mut acc, false);
        // 0.04h across the wrap is under the confidence window
        classifier.process(&sited(1, true, 0.02), &mut acc, false);
        match classifier.phase() {
            MotionPhase::Slewing(progress) => assert_eq!(progress.direction_sign, None),
            other => panic!("unexpected phase {other:?}"),
        }
        assert_eq!(acc.ra_baseline(), Some(0.02));

        classifier.process(&sited(2, true, 0.05), &mut acc, false);
        match classifier.phase() {
            MotionPhase::Slewing(progress) => assert_eq!(progress.direction_sign, Some(-1.0)),
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_commit_follows_confirmed_direction() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 10.0), &mut acc, false);
        let mut start = slewing(1, 10.0);
        start.ra_hours = 6.0;
        classifier.process(&start, &mut acc, false);
        // RA decreasing: clockwise, so azimuth should increase
        let mut mid = slewing(2, 100.0);
        mid.ra_hours = 5.0;
        classifier.process(&mid, &mut acc, false);

        // 10° -> 200° folds to -170°, but the slew went clockwise: +190°
        let out = classifier.process(&tracking(3, 200.0), &mut acc, false);
        assert!(close(out.applied_degrees, 190.0));
    }

    #[test]
    fn test_stop_catch_up_and_small_noise() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 50.0), &mut acc, false);
        classifier.process(&tracking(1, 50.8), &mut acc, false); // rate limited
        let out = classifier.process(&stopped(2, 50.8, false), &mut acc, false);
        assert!(close(out.applied_degrees, 0.8));

        classifier.process(&stopped(3, 51.0, false), &mut acc, false);
        assert!(close(acc.total_degrees(), 0.8));
        assert_eq!(acc.azimuth_baseline(), Some(50.8));
    }

    #[test]
    fn test_home_snap_once_after_settle() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&stopped(0, 0.0, false), &mut acc, false);
        acc.apply_delta(355.4, at(0));

        let out = classifier.process(&stopped(1, 0.0, true), &mut acc, false);
        assert!(out.events.is_empty());
        classifier.process(&stopped(3, 0.0, true), &mut acc, false);
        assert!(close(acc.total_degrees(), 355.4));

        let out = classifier.process(&stopped(6, 0.0, true), &mut acc, false);
        assert!(matches!(
            out.events.as_slice(),
            [
                AccumulatorEvent::Snapped { .. },
                AccumulatorEvent::Crossing { wrap_count: 1, .. }
            ]
        ));
        assert_eq!(acc.total_degrees(), 360.0);
        assert_eq!(classifier.phase().describe(), "Stopped at home");

        // Drift creeps back in but no second snap until home is left
        acc.apply_delta(0.3, at(7));
        let out = classifier.process(&stopped(20, 0.0, true), &mut acc, false);
        assert!(out.events.is_empty());

        classifier.process(&stopped(21, 0.0, false), &mut acc, false);
        classifier.process(&stopped(22, 0.0, true), &mut acc, false);
        classifier.process(&stopped(28, 0.0, true), &mut acc, false);
        assert_eq!(acc.total_degrees(), 360.0);
    }

    #[test]
    fn test_disconnect_clears_baselines() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 50.0), &mut acc, false);
        assert!(acc.azimuth_baseline().is_some());

        let out = classifier.process(&disconnected(1), &mut acc, false);
        assert_eq!(out.phase, PhaseKind::Disconnected);
        assert!(acc.azimuth_baseline().is_none());
        assert!(acc.ra_baseline().is_none());

        // Reconnect somewhere else: re-seed, no jump counted
        classifier.process(&tracking(10, 200.0), &mut acc, false);
        assert_eq!(acc.total_degrees(), 0.0);
    }

    #[test]
    fn test_repeated_phase_entry_does_not_double_count() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 10.0), &mut acc, false);
        classifier.process(&slewing(1, 20.0), &mut acc, false);
        classifier.process(&tracking(2, 40.0), &mut acc, false);
        classifier.process(&tracking(2, 40.0), &mut acc, false);
        classifier.process(&stopped(3, 40.0, false), &mut acc, false);
        classifier.process(&stopped(4, 40.0, false), &mut acc, false);

        assert!(close(acc.total_degrees(), 30.0));
    }

    #[test]
    fn test_suppressed_advances_baseline_only() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 10.0), &mut acc, false);
        classifier.process(&slewing(1, 10.0), &mut acc, true);
        let out = classifier.process(&tracking(2, 70.0), &mut acc, true);

        assert_eq!(out.applied_degrees, 0.0);
        assert_eq!(acc.total_degrees(), 0.0);
        assert_eq!(acc.azimuth_baseline(), Some(70.0));
    }

    #[test]
    fn test_resync_drops_slew_commit() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 10.0), &mut acc, false);
        classifier.process(&slewing(1, 30.0), &mut acc, false);
        classifier.resync(&mut acc);
        classifier.process(&tracking(2, 90.0), &mut acc, false);

        assert_eq!(acc.total_degrees(), 0.0);
        assert_eq!(acc.azimuth_baseline(), Some(90.0));
    }

    #[test]
    fn test_non_finite_sample_ignored() {
        let (mut classifier, mut acc) = setup();
        classifier.process(&tracking(0, 10.0), &mut acc, false);
        let mut bad = tracking(5, 11.0);
        bad.lst_hours = f64::NAN;
        let out = classifier.process(&bad, &mut acc, false);

        assert!(matches!(out.rejected, Some(SensorArtifact::NonFinite { .. })));
        assert_eq!(out.phase, PhaseKind::Tracking);
        assert_eq!(acc.azimuth_baseline(), Some(10.0));
    }
}
