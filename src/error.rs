//! Error types for the rotation tracker.
//!
//! This module defines the error taxonomy used across the crate. Using the
//! `thiserror` crate it gives each concern its own enum, and a top-level
//! [`WrapError`] that consolidates them for callers that only want one type.
//!
//! ## Error Hierarchy
//!
//! - **`SensorArtifact`**: a single position sample was rejected (non-finite
//!   input, or a jump larger than the sanity cap for the current phase). These
//!   never escape sample processing; they are logged and reported in the
//!   per-sample outcome.
//! - **`PersistenceError`**: I/O or (de)serialization trouble with the state
//!   and settings files. Load failures fall back to defaults, save failures
//!   leave the state dirty for the next attempt.
//! - **`UnwindError`**: the unwind maneuver could not finish. Returned to the
//!   caller of `begin_unwind`; cancellation is *not* an error.
//!
//! By using `#[from]`, `WrapError` can be created from any of these with `?`.
//! Configuration problems have their own `ConfigError` in [`crate::config`];
//! they only occur at startup and surface through `anyhow` in the binary.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type WrapResult<T> = std::result::Result<T, WrapError>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum WrapError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Rejected sensor artifact: {0}")]
    SensorArtifact(#[from] SensorArtifact),

    #[error("Unwind maneuver in progress")]
    ManeuverInProgress,

    #[error("Engine actor has stopped")]
    ActorStopped,

    #[error("Unwind maneuver failed: {0}")]
    Unwind(#[from] UnwindError),
}

/// Why a position sample (or the delta derived from it) was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorArtifact {
    #[error("non-finite {field} in position sample")]
    NonFinite { field: &'static str },

    #[error("tracking jump of {delta:.2}° exceeds {cap:.2}° cap")]
    TrackingJump { delta: f64, cap: f64 },

    #[error("slew tick of {delta:.2}° exceeds {cap:.2}° cap")]
    SlewSpike { delta: f64, cap: f64 },
}

/// Failures talking to the state/settings files.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Ways the unwind maneuver can fail.
///
/// Every variant is raised only after the suppression flag has been
/// released and the partially unwound total has been written back.
#[derive(Error, Debug)]
pub enum UnwindError {
    #[error("No pointing reference: need a connected sample with a configured site")]
    NoPointingReference,

    #[error("Safe positioning slew failed: {0}")]
    SafePositioning(#[source] anyhow::Error),

    #[error("Step {step} slew failed with {remaining_degrees:.1}° remaining: {source}")]
    StepCommand {
        step: u32,
        remaining_degrees: f64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Homing failed: {0}")]
    Homing(#[source] anyhow::Error),

    #[error("Step budget of {max_steps} exhausted with {remaining_degrees:.1}° remaining")]
    StepLimitExceeded { max_steps: u32, remaining_degrees: f64 },
}
