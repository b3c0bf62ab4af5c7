//! Message types for actor-based communication
//!
//! Commands sent from an [`EngineHandle`](crate::actor::EngineHandle) to the
//! [`EngineActor`](crate::actor::EngineActor). Request/response commands
//! carry a `oneshot::Sender`; samples are fire-and-forget.

use tokio::sync::{broadcast, oneshot};

use crate::engine::{EngineEvent, ThresholdCheck, WrapSnapshot};
use crate::error::{UnwindError, WrapResult};
use crate::sample::PositionSample;
use crate::unwind::{CancellationToken, UnwindOutcome};

/// Commands that can be sent to the EngineActor
#[derive(Debug)]
pub enum EngineCommand {
    /// Process one position sample
    Sample(Box<PositionSample>),

    /// Read the current snapshot
    Snapshot {
        response: oneshot::Sender<WrapSnapshot>,
    },

    /// Zero the accumulator
    Reset {
        response: oneshot::Sender<WrapResult<()>>,
    },

    /// Change the warning threshold
    SetThreshold {
        rotations: f64,
        response: oneshot::Sender<f64>,
    },

    /// Automation gate query
    CheckThreshold {
        response: oneshot::Sender<ThresholdCheck>,
    },

    /// Start the unwind maneuver; answers when it ends
    BeginUnwind {
        cancel: CancellationToken,
        response: oneshot::Sender<Result<UnwindOutcome, UnwindError>>,
    },

    /// Subscribe to engine notifications
    Subscribe {
        response: oneshot::Sender<broadcast::Receiver<EngineEvent>>,
    },

    /// Flush state and stop the actor
    Shutdown { response: oneshot::Sender<()> },
}

impl EngineCommand {
    /// Helper to create a Sample command
    pub fn sample(sample: PositionSample) -> Self {
        Self::Sample(Box::new(sample))
    }

    /// Helper to create a Snapshot command
    pub fn snapshot() -> (Self, oneshot::Receiver<WrapSnapshot>) {
        let (tx, rx) = oneshot::channel();
        (Self::Snapshot { response: tx }, rx)
    }

    /// Helper to create a Reset command
    pub fn reset() -> (Self, oneshot::Receiver<WrapResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Reset { response: tx }, rx)
    }

    /// Helper to create a SetThreshold command
    pub fn set_threshold(rotations: f64) -> (Self, oneshot::Receiver<f64>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetThreshold {
                rotations,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a CheckThreshold command
    pub fn check_threshold() -> (Self, oneshot::Receiver<ThresholdCheck>) {
        let (tx, rx) = oneshot::channel();
        (Self::CheckThreshold { response: tx }, rx)
    }

    /// Helper to create a BeginUnwind command
    pub fn begin_unwind(
        cancel: CancellationToken,
    ) -> (
        Self,
        oneshot::Receiver<Result<UnwindOutcome, UnwindError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        (
            Self::BeginUnwind {
                cancel,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Subscribe command
    pub fn subscribe() -> (Self, oneshot::Receiver<broadcast::Receiver<EngineEvent>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Subscribe { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
