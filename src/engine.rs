//! The rotation-tracking engine.
//!
//! [`WrapEngine`] owns one classifier, one accumulator and the persistence
//! gate behind a single mutex, so sample processing and maneuver writes can
//! never interleave. The unwind maneuver additionally raises a suppression
//! flag for its whole run; while it is up, samples still flow through the
//! classifier (keeping baselines current) but cannot move the total.
//!
//! ## Time
//!
//! Sample processing uses each sample's own timestamp. Commands (reset,
//! threshold changes, the maneuver) stamp their history notes with the wall
//! clock.
//!
//! ## Notifications
//!
//! Consumers subscribe to [`EngineEvent`]s through a broadcast channel.
//! Slow subscribers lag and lose events; the engine never waits on them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::accumulator::{AccumulatorEvent, RotationAccumulator};
use crate::buffer::{DisplayBuffer, RotationPoint};
use crate::classifier::{MotionClassifier, PhaseKind, SampleOutcome};
use crate::config::EngineConfig;
use crate::error::{PersistenceError, UnwindError, WrapError, WrapResult};
use crate::mount::MountControl;
use crate::persistence::{
    load_settings_or_default, load_state_or_default, JsonFileStore, PersistGate, StateStore,
};
use crate::sample::PositionSample;
use crate::state::{clamp_threshold, WrapEvent, WrapSettings};
use crate::unwind::{
    run_unwind, CancellationToken, ManeuverHost, Pointing, UnwindOutcome, UnwindPhase, UnwindPlan,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notification pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Crossing, threshold alert, snap or reset.
    Accumulator(AccumulatorEvent),
    /// Motion phase changed.
    PhaseChanged {
        /// Previous phase.
        from: PhaseKind,
        /// New phase.
        to: PhaseKind,
    },
    /// A sample or delta was discarded.
    SampleRejected {
        /// Rejection reason.
        reason: String,
    },
    /// Maneuver moved to a new phase.
    Unwind(UnwindPhase),
    /// Maneuver confirmed a step.
    UnwindProgress {
        /// Rotation still to unwind.
        remaining_degrees: f64,
    },
    /// Warning threshold changed.
    ThresholdChanged {
        /// Effective (clamped) threshold.
        rotations: f64,
    },
}

/// Read-only view for display and automation consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrapSnapshot {
    /// Signed accumulated rotation.
    pub total_degrees: f64,
    /// `total_degrees / 360`.
    pub wrap_count: f64,
    /// Current motion phase.
    pub phase: PhaseKind,
    /// Human-readable status line.
    pub status: String,
    /// Warning threshold in degrees.
    pub warning_threshold_degrees: f64,
    /// Warning threshold in rotations.
    pub warning_threshold_rotations: f64,
    /// Unwind maneuver running.
    pub maneuver_in_progress: bool,
    /// Latest maneuver phase.
    pub unwind_phase: UnwindPhase,
    /// Threshold alert has fired since the last reset.
    pub alert_fired: bool,
    /// When the accumulator was last zeroed.
    pub zero_set_at: DateTime<Utc>,
    /// Pruned history, oldest first.
    pub history: Vec<WrapEvent>,
}

/// Answer to "is the rotation within threshold?"
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdCheck {
    /// `|total| < threshold`.
    pub within: bool,
    /// `threshold - |total|`; negative once breached.
    pub margin_degrees: f64,
    /// Signed accumulated rotation.
    pub total_degrees: f64,
    /// Threshold in degrees.
    pub threshold_degrees: f64,
}

struct EngineCore {
    classifier: MotionClassifier,
    accumulator: RotationAccumulator,
    gate: PersistGate,
    display: DisplayBuffer,
    pointing: Option<Pointing>,
    unwind_phase: UnwindPhase,
}

/// The owned engine instance.
pub struct WrapEngine {
    core: Mutex<EngineCore>,
    store: Arc<dyn StateStore>,
    maneuver_active: AtomicBool,
    events: broadcast::Sender<EngineEvent>,
    plan: UnwindPlan,
}

impl std::fmt::Debug for WrapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapEngine")
            .field("maneuver_active", &self.maneuver_in_progress())
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl WrapEngine {
    /// Build an engine, loading persisted state and settings from `store`.
    ///
    /// Missing or unreadable records fall back to defaults.
    pub fn new(config: &EngineConfig, store: Arc<dyn StateStore>) -> Self {
        let now = Utc::now();
        let state = load_state_or_default(store.as_ref(), now);
        let settings = load_settings_or_default(store.as_ref());
        info!(
            total = state.total_degrees,
            threshold_rotations = settings.warning_threshold_rotations,
            "Rotation state loaded"
        );

        let mut accumulator = RotationAccumulator::new(
            state,
            settings,
            config.retention(),
            config.tracking.snap_epsilon_deg,
        );
        accumulator.prune_history(now);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            core: Mutex::new(EngineCore {
                classifier: MotionClassifier::new(config.classifier_config()),
                accumulator,
                gate: PersistGate::new(config.persistence.save_interval),
                display: DisplayBuffer::new(config.history.display_buffer_capacity),
                pointing: None,
                unwind_phase: UnwindPhase::Idle,
            }),
            store,
            maneuver_active: AtomicBool::new(false),
            events,
            plan: config.unwind_plan(),
        }
    }

    /// Engine backed by the JSON files named in `config`.
    pub fn open(config: &EngineConfig) -> Self {
        let store = JsonFileStore::new(config.state_path(), config.settings_path());
        Self::new(config, Arc::new(store))
    }

    fn lock(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Subscribe to engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Whether an unwind maneuver holds the suppression flag.
    pub fn maneuver_in_progress(&self) -> bool {
        self.maneuver_active.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Sample path
    // ========================================================================

    /// Process one position sample.
    ///
    /// Never fails: rejected samples are reported in the outcome and logged.
    pub fn process_sample(&self, sample: &PositionSample) -> SampleOutcome {
        let mut guard = self.lock();
        let core = &mut *guard;
        let suppressed = self.maneuver_in_progress();
        let before = core.classifier.phase().kind();

        let outcome = core
            .classifier
            .process(sample, &mut core.accumulator, suppressed);

        if sample.connected && sample.validate().is_ok() {
            core.pointing = Some(Pointing {
                lst_hours: sample.lst_hours,
                azimuth_deg: sample.azimuth(),
                site: sample.site(),
            });
        }
        core.accumulator.prune_history(sample.timestamp);
        core.display
            .push(sample.timestamp, core.accumulator.total_degrees());

        if before != outcome.phase {
            self.publish(EngineEvent::PhaseChanged {
                from: before,
                to: outcome.phase,
            });
        }
        if let Some(artifact) = &outcome.rejected {
            self.publish(EngineEvent::SampleRejected {
                reason: artifact.to_string(),
            });
        }
        for event in &outcome.events {
            self.publish(EngineEvent::Accumulator(event.clone()));
        }

        if outcome.applied_degrees != 0.0 || !outcome.events.is_empty() {
            core.gate.mark_dirty();
        }
        if !outcome.events.is_empty() || core.gate.is_due(sample.timestamp) {
            self.persist(core, sample.timestamp);
        }

        outcome
    }

    fn persist(&self, core: &mut EngineCore, now: DateTime<Utc>) {
        if !core.gate.is_dirty() {
            return;
        }
        match self.store.save_state(core.accumulator.state()) {
            Ok(()) => {
                debug!(total = core.accumulator.total_degrees(), "Rotation state saved");
                core.gate.saved(now);
            }
            Err(e) => warn!(error = %e, "Failed to save rotation state; will retry"),
        }
    }

    /// Write pending state now.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let mut core = self.lock();
        if !core.gate.is_dirty() {
            return Ok(());
        }
        self.store.save_state(core.accumulator.state())?;
        core.gate.saved(Utc::now());
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current state for display consumers.
    pub fn snapshot(&self) -> WrapSnapshot {
        let core = self.lock();
        let state = core.accumulator.state();
        let settings = core.accumulator.settings();
        WrapSnapshot {
            total_degrees: state.total_degrees,
            wrap_count: state.total_degrees / 360.0,
            phase: core.classifier.phase().kind(),
            status: self.status_line(&core),
            warning_threshold_degrees: settings.threshold_degrees(),
            warning_threshold_rotations: settings.warning_threshold_rotations,
            maneuver_in_progress: self.maneuver_in_progress(),
            unwind_phase: core.unwind_phase,
            alert_fired: state.alert_fired,
            zero_set_at: state.zero_set_at,
            history: state.history.clone(),
        }
    }

    fn status_line(&self, core: &EngineCore) -> String {
        if self.maneuver_in_progress() {
            return match core.unwind_phase {
                UnwindPhase::Stepping {
                    step,
                    remaining_degrees,
                } => format!("Unwinding: step {step}, {remaining_degrees:+.1}° remaining"),
                UnwindPhase::SafePositioning => "Unwinding: moving to safe position".into(),
                UnwindPhase::Homing => "Unwinding: returning home".into(),
                _ => "Unwinding".into(),
            };
        }
        core.classifier.phase().describe()
    }

    /// Whether the rotation is inside the warning threshold, with margin.
    pub fn check_within_threshold(&self) -> ThresholdCheck {
        let core = self.lock();
        let total = core.accumulator.total_degrees();
        let threshold = core.accumulator.threshold_degrees();
        let margin = threshold - total.abs();
        ThresholdCheck {
            within: margin > 0.0,
            margin_degrees: margin,
            total_degrees: total,
            threshold_degrees: threshold,
        }
    }

    /// Recent `(timestamp, total)` points, oldest first.
    pub fn recent_points(&self) -> Vec<RotationPoint> {
        self.lock().display.points()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Zero the accumulator with a history entry.
    ///
    /// Refused while an unwind maneuver is running.
    pub fn reset(&self) -> WrapResult<()> {
        let mut guard = self.lock();
        // The flag only changes under this lock
        if self.maneuver_in_progress() {
            return Err(WrapError::ManeuverInProgress);
        }
        let now = Utc::now();
        let core = &mut *guard;
        let event = core.accumulator.reset(now, "Manual reset");
        core.classifier.resync(&mut core.accumulator);
        core.display.push(now, 0.0);
        core.gate.mark_dirty();
        self.persist(core, now);
        self.publish(EngineEvent::Accumulator(event));
        Ok(())
    }

    /// Set the warning threshold, clamped to the allowed range.
    ///
    /// Settings are saved immediately and the new threshold is evaluated
    /// against the current total. Returns the effective value.
    pub fn set_threshold_rotations(&self, rotations: f64) -> f64 {
        let effective = clamp_threshold(rotations);
        if effective != rotations {
            warn!(requested = rotations, effective, "Warning threshold clamped");
        }

        let now = Utc::now();
        let settings = WrapSettings::with_threshold(effective);
        let mut guard = self.lock();
        let core = &mut *guard;
        let events = core.accumulator.set_settings(settings, now);

        if let Err(e) = self.store.save_settings(&settings) {
            warn!(error = %e, "Failed to save settings");
        }
        info!(rotations = effective, "Warning threshold set");
        self.publish(EngineEvent::ThresholdChanged {
            rotations: effective,
        });

        if !events.is_empty() {
            core.gate.mark_dirty();
            self.persist(core, now);
        }
        for event in events {
            self.publish(EngineEvent::Accumulator(event));
        }
        effective
    }

    /// Run the unwind maneuver against `mount`.
    ///
    /// A second call while one is running returns
    /// [`UnwindOutcome::AlreadyRunning`] without doing anything. The
    /// suppression flag is released however the maneuver ends, and the
    /// resulting state is persisted.
    pub async fn begin_unwind(
        &self,
        mount: &dyn MountControl,
        cancel: &CancellationToken,
    ) -> Result<UnwindOutcome, UnwindError> {
        let Some(_guard) = ManeuverGuard::acquire(self) else {
            info!("Unwind already in progress; request ignored");
            return Ok(UnwindOutcome::AlreadyRunning);
        };

        let port = ManeuverPort { engine: self };
        let result = run_unwind(&port, mount, &self.plan, cancel).await;

        let mut guard = self.lock();
        let core = &mut *guard;
        core.gate.mark_dirty();
        self.persist(core, Utc::now());
        result
    }
}

// ============================================================================
// Maneuver plumbing
// ============================================================================

/// Holds the suppression flag for the life of one maneuver.
struct ManeuverGuard<'a> {
    engine: &'a WrapEngine,
}

impl<'a> ManeuverGuard<'a> {
    fn acquire(engine: &'a WrapEngine) -> Option<Self> {
        let _core = engine.lock();
        engine
            .maneuver_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { engine })
    }
}

impl Drop for ManeuverGuard<'_> {
    fn drop(&mut self) {
        let mut guard = self.engine.lock();
        let core = &mut *guard;
        // Motion made while suppressed must never be counted afterwards
        core.classifier.resync(&mut core.accumulator);
        self.engine.maneuver_active.store(false, Ordering::SeqCst);
        debug!("Suppression released");
    }
}

struct ManeuverPort<'a> {
    engine: &'a WrapEngine,
}

impl ManeuverHost for ManeuverPort<'_> {
    fn pointing(&self) -> Option<Pointing> {
        self.engine.lock().pointing
    }

    fn total_degrees(&self) -> f64 {
        self.engine.lock().accumulator.total_degrees()
    }

    fn set_total(&self, degrees: f64) {
        let now = Utc::now();
        let mut guard = self.engine.lock();
        let core = &mut *guard;
        core.accumulator.set_maneuver_total(degrees);
        core.display.push(now, degrees);
        core.gate.mark_dirty();
        self.engine.persist(core, now);
        self.engine.publish(EngineEvent::UnwindProgress {
            remaining_degrees: degrees,
        });
    }

    fn record(&self, note: String) {
        let mut core = self.engine.lock();
        core.accumulator.record(Utc::now(), note);
        core.gate.mark_dirty();
    }

    fn reset(&self, note: &str) {
        let now = Utc::now();
        let mut guard = self.engine.lock();
        let core = &mut *guard;
        let event = core.accumulator.reset(now, note);
        core.display.push(now, 0.0);
        core.gate.mark_dirty();
        self.engine.persist(core, now);
        self.engine.publish(EngineEvent::Accumulator(event));
    }

    fn set_phase(&self, phase: UnwindPhase) {
        self.engine.lock().unwind_phase = phase;
        self.engine.publish(EngineEvent::Unwind(phase));
    }
}
