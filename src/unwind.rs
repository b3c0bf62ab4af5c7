//! Unwind maneuver: actively drives the axis back toward zero rotation.
//!
//! ```text
//! Idle ─► SafePositioning ─► Stepping ─► Homing ─► Committing ─► Idle
//!               │               │  ▲        │
//!               │               └──┘        │
//!               └────────┬──────┴───────────┘
//!                        ▼
//!                Failed / Cancelled
//! ```
//!
//! The mount first goes to a high-altitude point at its current azimuth, then
//! steps around in azimuth at that altitude, at most `max_step_deg` per step,
//! opposite to the accumulated sign. Keeping every target at the same safe
//! altitude means no step can command a position below the horizon, and
//! keeping steps well under 180° means the mount's shortest-path goto always
//! moves the intended way.
//!
//! The host (the engine) holds the suppression flag for the whole run, so the
//! total shown to consumers is whatever this routine mirrors into it.
//! Cancellation is cooperative and checked before every step and before
//! homing; partial progress is kept, never rolled back.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::astro::{horizontal_to_equatorial, normalize_degrees, Site};
use crate::error::UnwindError;
use crate::mount::MountControl;

/// Limits for one unwind run.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindPlan {
    /// Totals below this count as already unwound.
    pub min_remaining_deg: f64,
    /// Largest azimuth change per commanded step.
    pub max_step_deg: f64,
    /// Step budget.
    pub max_steps: u32,
    /// Altitude held during stepping.
    pub safe_altitude_deg: f64,
    /// Pause after each confirmed step.
    pub step_pause: Duration,
}

impl Default for UnwindPlan {
    fn default() -> Self {
        Self {
            min_remaining_deg: 10.0,
            max_step_deg: 60.0,
            max_steps: 20,
            safe_altitude_deg: 60.0,
            step_pause: Duration::from_secs(1),
        }
    }
}

/// Where the maneuver currently is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UnwindPhase {
    /// Not running (or finished successfully).
    Idle,
    /// Moving to the safe starting point.
    SafePositioning,
    /// Executing step `step`.
    Stepping {
        /// 1-based step number.
        step: u32,
        /// Rotation still to unwind before this step.
        remaining_degrees: f64,
    },
    /// Returning home.
    Homing,
    /// Zeroing the accumulator.
    Committing,
    /// Stopped at the caller's request.
    Cancelled,
    /// Stopped by an error.
    Failed,
}

/// How an unwind request ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnwindOutcome {
    /// Fully unwound, homed and zeroed.
    Completed {
        /// Steps commanded.
        steps: u32,
    },
    /// Total was already within tolerance; reset without moving.
    AlreadyUnwound,
    /// Cancelled between steps; the partial value was kept.
    Cancelled {
        /// Rotation left when cancellation was observed.
        remaining_degrees: f64,
    },
    /// Another unwind was in flight; nothing done.
    AlreadyRunning,
}

/// Cooperative cancellation flag shared between the requester and the
/// maneuver.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Where the mount is pointing, from the latest sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointing {
    /// Local sidereal time, hours.
    pub lst_hours: f64,
    /// Estimated azimuth, degrees.
    pub azimuth_deg: f64,
    /// Observing site.
    pub site: Site,
}

/// What the maneuver needs from the engine that runs it.
pub trait ManeuverHost: Send + Sync {
    /// Latest pointing reference, if one is known.
    fn pointing(&self) -> Option<Pointing>;
    /// Current accumulated total.
    fn total_degrees(&self) -> f64;
    /// Mirror the maneuver's remaining rotation into the total.
    fn set_total(&self, degrees: f64);
    /// Append a history note.
    fn record(&self, note: String);
    /// Zero the accumulator with a history note.
    fn reset(&self, note: &str);
    /// Publish the current phase.
    fn set_phase(&self, phase: UnwindPhase);
}

/// Run the maneuver to completion, cancellation, or failure.
///
/// The caller owns the in-flight/suppression flags; this routine only moves
/// the mount and writes through `host`.
pub async fn run_unwind(
    host: &dyn ManeuverHost,
    mount: &dyn MountControl,
    plan: &UnwindPlan,
    cancel: &CancellationToken,
) -> Result<UnwindOutcome, UnwindError> {
    let start_total = host.total_degrees();
    if start_total.abs() < plan.min_remaining_deg {
        info!(total = start_total, "Already unwound; resetting");
        host.reset("Unwind requested within tolerance; reset");
        host.set_phase(UnwindPhase::Idle);
        return Ok(UnwindOutcome::AlreadyUnwound);
    }

    let result = drive(host, mount, plan, cancel, start_total).await;
    match &result {
        Ok(UnwindOutcome::Cancelled { .. }) => host.set_phase(UnwindPhase::Cancelled),
        Ok(_) => host.set_phase(UnwindPhase::Idle),
        Err(e) => {
            error!(error = %e, "Unwind failed");
            host.record(format!(
                "Unwind failed at {:+.1}°: {e}",
                host.total_degrees()
            ));
            host.set_phase(UnwindPhase::Failed);
        }
    }
    result
}

async fn drive(
    host: &dyn ManeuverHost,
    mount: &dyn MountControl,
    plan: &UnwindPlan,
    cancel: &CancellationToken,
    start_total: f64,
) -> Result<UnwindOutcome, UnwindError> {
    let start = host
        .pointing()
        .filter(|p| p.site.is_configured())
        .ok_or(UnwindError::NoPointingReference)?;

    info!(
        total = start_total,
        azimuth = start.azimuth_deg,
        "Starting unwind"
    );
    host.record(format!("Unwind started at {start_total:+.1}°"));

    host.set_phase(UnwindPhase::SafePositioning);
    let mut azimuth = start.azimuth_deg;
    let (ra, dec) =
        horizontal_to_equatorial(plan.safe_altitude_deg, azimuth, start.lst_hours, start.site);
    mount
        .slew_to(ra, dec)
        .await
        .map_err(UnwindError::SafePositioning)?;

    let mut remaining = start_total;
    let mut steps = 0u32;
    while remaining.abs() >= plan.min_remaining_deg {
        if cancel.is_cancelled() {
            return Ok(cancelled(host, remaining));
        }
        if steps >= plan.max_steps {
            return Err(UnwindError::StepLimitExceeded {
                max_steps: plan.max_steps,
                remaining_degrees: remaining,
            });
        }
        steps += 1;

        let sign = remaining.signum();
        let step = plan.max_step_deg.min(remaining.abs());
        azimuth = normalize_degrees(azimuth - sign * step);
        // LST keeps moving during the maneuver; use the freshest sample
        let lst = host.pointing().map_or(start.lst_hours, |p| p.lst_hours);
        let (ra, dec) =
            horizontal_to_equatorial(plan.safe_altitude_deg, azimuth, lst, start.site);

        host.set_phase(UnwindPhase::Stepping {
            step: steps,
            remaining_degrees: remaining,
        });
        mount
            .slew_to(ra, dec)
            .await
            .map_err(|source| UnwindError::StepCommand {
                step: steps,
                remaining_degrees: remaining,
                source,
            })?;

        remaining -= sign * step;
        host.set_total(remaining);
        info!(step = steps, remaining, azimuth, "Unwind step complete");

        if !plan.step_pause.is_zero() {
            sleep(plan.step_pause).await;
        }
    }

    if cancel.is_cancelled() {
        return Ok(cancelled(host, remaining));
    }

    host.set_phase(UnwindPhase::Homing);
    mount.go_home().await.map_err(UnwindError::Homing)?;

    host.set_phase(UnwindPhase::Committing);
    host.reset("Unwind complete");
    info!(steps, "Unwind complete");
    Ok(UnwindOutcome::Completed { steps })
}

fn cancelled(host: &dyn ManeuverHost, remaining: f64) -> UnwindOutcome {
    warn!(remaining, "Unwind cancelled");
    host.record(format!("Unwind cancelled at {remaining:+.1}°"));
    UnwindOutcome::Cancelled {
        remaining_degrees: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro::{estimate_azimuth, fold_degrees};
    use crate::mount::{MockMount, MountCommand};
    use std::sync::Mutex;

    const SITE: Site = Site {
        latitude_deg: 40.0,
        longitude_deg: -105.0,
    };

    struct FakeHost {
        total: Mutex<f64>,
        totals: Mutex<Vec<f64>>,
        notes: Mutex<Vec<String>>,
        phases: Mutex<Vec<UnwindPhase>>,
        pointing: Option<Pointing>,
        cancel_after_steps: Option<(usize, CancellationToken)>,
    }

    impl FakeHost {
        fn new(total: f64) -> Self {
            Self {
                total: Mutex::new(total),
                totals: Mutex::new(Vec::new()),
                notes: Mutex::new(Vec::new()),
                phases: Mutex::new(Vec::new()),
                pointing: Some(Pointing {
                    lst_hours: 4.0,
                    azimuth_deg: 120.0,
                    site: SITE,
                }),
                cancel_after_steps: None,
            }
        }
    }

    impl ManeuverHost for FakeHost {
        fn pointing(&self) -> Option<Pointing> {
            self.pointing
        }
        fn total_degrees(&self) -> f64 {
            *self.total.lock().unwrap()
        }
        fn set_total(&self, degrees: f64) {
            *self.total.lock().unwrap() = degrees;
            let mut totals = self.totals.lock().unwrap();
            totals.push(degrees);
            if let Some((n, token)) = &self.cancel_after_steps {
                if totals.len() >= *n {
                    token.cancel();
                }
            }
        }
        fn record(&self, note: String) {
            self.notes.lock().unwrap().push(note);
        }
        fn reset(&self, note: &str) {
            *self.total.lock().unwrap() = 0.0;
            self.notes.lock().unwrap().push(note.to_string());
        }
        fn set_phase(&self, phase: UnwindPhase) {
            self.phases.lock().unwrap().push(phase);
        }
    }

    fn fast_plan() -> UnwindPlan {
        UnwindPlan {
            step_pause: Duration::ZERO,
            ..UnwindPlan::default()
        }
    }

    #[tokio::test]
    async fn test_unwind_converges_from_500() {
        let host = FakeHost::new(500.0);
        let mount = MockMount::new();
        let outcome = run_unwind(&host, &mount, &fast_plan(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, UnwindOutcome::Completed { steps: 9 });
        assert_eq!(host.total_degrees(), 0.0);

        let mut previous = 500.0_f64;
        for total in host.totals.lock().unwrap().iter() {
            let reduced = previous.abs() - total.abs();
            assert!(reduced > 0.0 && reduced <= 60.0, "{previous} -> {total}");
            previous = *total;
        }

        let commands = mount.commands().await;
        assert_eq!(commands.len(), 1 + 9 + 1);
        assert_eq!(commands.last(), Some(&MountCommand::GoHome));
        assert_eq!(*host.phases.lock().unwrap().last().unwrap(), UnwindPhase::Idle);
    }

    #[tokio::test]
    async fn test_steps_move_opposite_to_winding_at_safe_altitude() {
        let host = FakeHost::new(130.0);
        let mount = MockMount::new();
        run_unwind(&host, &mount, &fast_plan(), &CancellationToken::new())
            .await
            .unwrap();

        let azimuths: Vec<f64> = mount
            .commands()
            .await
            .into_iter()
            .filter_map(|c| match c {
                MountCommand::SlewTo {
                    ra_hours,
                    dec_degrees,
                } => Some(estimate_azimuth(ra_hours, dec_degrees, 4.0, SITE, 0.0)),
                MountCommand::GoHome => None,
            })
            .collect();

        // Safe point at the current azimuth, then 60, 60, 10 degrees back
        let expected = [120.0, 60.0, 0.0, 350.0];
        assert_eq!(azimuths.len(), expected.len());
        for (got, want) in azimuths.iter().zip(expected) {
            assert!(fold_degrees(got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[tokio::test]
    async fn test_small_total_is_plain_reset() {
        let host = FakeHost::new(-7.5);
        let mount = MockMount::new();
        let outcome = run_unwind(&host, &mount, &fast_plan(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, UnwindOutcome::AlreadyUnwound);
        assert_eq!(host.total_degrees(), 0.0);
        assert!(mount.commands().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_progress() {
        let token = CancellationToken::new();
        let mut host = FakeHost::new(-300.0);
        host.cancel_after_steps = Some((2, token.clone()));
        let mount = MockMount::new();

        let outcome = run_unwind(&host, &mount, &fast_plan(), &token).await.unwrap();

        assert_eq!(
            outcome,
            UnwindOutcome::Cancelled {
                remaining_degrees: -180.0
            }
        );
        assert_eq!(host.total_degrees(), -180.0);
        assert!(!mount.commands().await.contains(&MountCommand::GoHome));
        assert!(host
            .notes
            .lock()
            .unwrap()
            .iter()
            .any(|n| n.contains("cancelled")));
    }

    #[tokio::test]
    async fn test_step_failure_aborts() {
        let host = FakeHost::new(200.0);
        // Command 1 is the safe-positioning slew; fail the second step
        let mount = MockMount::new().failing_on_command(3);
        let err = run_unwind(&host, &mount, &fast_plan(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UnwindError::StepCommand { step: 2, .. }));
        assert_eq!(host.total_degrees(), 140.0);
        assert_eq!(*host.phases.lock().unwrap().last().unwrap(), UnwindPhase::Failed);
    }

    #[tokio::test]
    async fn test_safe_positioning_failure_is_fatal() {
        let host = FakeHost::new(200.0);
        let mount = MockMount::new().failing_on_command(1);
        let err = run_unwind(&host, &mount, &fast_plan(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UnwindError::SafePositioning(_)));
        assert_eq!(host.total_degrees(), 200.0);
        assert_eq!(mount.commands().await.len(), 1);
    }

    #[tokio::test]
    async fn test_step_budget_enforced() {
        let host = FakeHost::new(2000.0);
        let mount = MockMount::new();
        let err = run_unwind(&host, &mount, &fast_plan(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UnwindError::StepLimitExceeded { max_steps: 20, .. }
        ));
        assert_eq!(host.total_degrees(), 800.0);
    }

    #[tokio::test]
    async fn test_no_site_fails_before_moving() {
        let mut host = FakeHost::new(200.0);
        host.pointing = None;
        let mount = MockMount::new();
        let err = run_unwind(&host, &mount, &fast_plan(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UnwindError::NoPointingReference));
        assert!(mount.commands().await.is_empty());
    }
}
