//! Actor front end for the engine.
//!
//! The [`EngineActor`] task is the only thing that feeds samples to the
//! engine, so samples are processed strictly one at a time in arrival order.
//! Unwind requests are spawned as their own tasks; the command loop keeps
//! draining samples while a maneuver runs.
//!
//! ```rust,ignore
//! let (handle, task) = EngineActor::new(engine, mount, config.persistence.save_interval).spawn();
//! handle.send_sample(sample).await?;
//! let snapshot = handle.snapshot().await?;
//! handle.shutdown().await?;
//! task.await?;
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::engine::{EngineEvent, ThresholdCheck, WrapEngine, WrapSnapshot};
use crate::error::{WrapError, WrapResult};
use crate::messages::EngineCommand;
use crate::mount::MountControl;
use crate::sample::PositionSample;
use crate::unwind::{CancellationToken, UnwindOutcome};

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Owns the engine on behalf of its handles.
pub struct EngineActor {
    engine: Arc<WrapEngine>,
    mount: Arc<dyn MountControl>,
    flush_interval: Duration,
}

impl EngineActor {
    /// Actor that flushes dirty state every `flush_interval`.
    pub fn new(
        engine: Arc<WrapEngine>,
        mount: Arc<dyn MountControl>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            engine,
            mount,
            flush_interval,
        }
    }

    /// Start the command loop on the current runtime.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (EngineHandle { tx }, task)
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(self, mut command_rx: mpsc::Receiver<EngineCommand>) {
        info!("EngineActor started");
        let mut flush_tick = interval(self.flush_interval.max(Duration::from_millis(10)));
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command) {
                        return;
                    }
                }
                _ = flush_tick.tick() => self.flush(),
            }
        }

        self.flush();
        info!("EngineActor stopped: all handles dropped");
    }

    /// Returns `false` once the actor should stop.
    fn handle(&self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Sample(sample) => {
                self.engine.process_sample(&sample);
            }

            EngineCommand::Snapshot { response } => {
                let _ = response.send(self.engine.snapshot());
            }

            EngineCommand::Reset { response } => {
                let _ = response.send(self.engine.reset());
            }

            EngineCommand::SetThreshold {
                rotations,
                response,
            } => {
                let _ = response.send(self.engine.set_threshold_rotations(rotations));
            }

            EngineCommand::CheckThreshold { response } => {
                let _ = response.send(self.engine.check_within_threshold());
            }

            EngineCommand::BeginUnwind { cancel, response } => {
                let engine = Arc::clone(&self.engine);
                let mount = Arc::clone(&self.mount);
                tokio::spawn(async move {
                    let result = engine.begin_unwind(mount.as_ref(), &cancel).await;
                    let _ = response.send(result);
                });
            }

            EngineCommand::Subscribe { response } => {
                let _ = response.send(self.engine.subscribe());
            }

            EngineCommand::Shutdown { response } => {
                info!("EngineActor shutting down");
                self.flush();
                let _ = response.send(());
                return false;
            }
        }
        true
    }

    fn flush(&self) {
        if let Err(e) = self.engine.flush() {
            warn!(error = %e, "Periodic state flush failed");
        }
    }
}

/// Cloneable sender side of the actor.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> WrapResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| WrapError::ActorStopped)
    }

    /// Queue a sample for processing.
    pub async fn send_sample(&self, sample: PositionSample) -> WrapResult<()> {
        self.send(EngineCommand::sample(sample)).await
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> WrapResult<WrapSnapshot> {
        let (cmd, rx) = EngineCommand::snapshot();
        self.send(cmd).await?;
        rx.await.map_err(|_| WrapError::ActorStopped)
    }

    /// Zero the accumulator.
    pub async fn reset(&self) -> WrapResult<()> {
        let (cmd, rx) = EngineCommand::reset();
        self.send(cmd).await?;
        rx.await.map_err(|_| WrapError::ActorStopped)?
    }

    /// Set the warning threshold; returns the clamped value.
    pub async fn set_threshold_rotations(&self, rotations: f64) -> WrapResult<f64> {
        let (cmd, rx) = EngineCommand::set_threshold(rotations);
        self.send(cmd).await?;
        rx.await.map_err(|_| WrapError::ActorStopped)
    }

    /// Automation gate query.
    pub async fn check_within_threshold(&self) -> WrapResult<ThresholdCheck> {
        let (cmd, rx) = EngineCommand::check_threshold();
        self.send(cmd).await?;
        rx.await.map_err(|_| WrapError::ActorStopped)
    }

    /// Run the unwind maneuver and wait for it to end.
    pub async fn begin_unwind(&self, cancel: CancellationToken) -> WrapResult<UnwindOutcome> {
        let (cmd, rx) = EngineCommand::begin_unwind(cancel);
        self.send(cmd).await?;
        Ok(rx.await.map_err(|_| WrapError::ActorStopped)??)
    }

    /// Subscribe to engine notifications.
    pub async fn subscribe(&self) -> WrapResult<broadcast::Receiver<EngineEvent>> {
        let (cmd, rx) = EngineCommand::subscribe();
        self.send(cmd).await?;
        rx.await.map_err(|_| WrapError::ActorStopped)
    }

    /// Flush state and stop the actor.
    pub async fn shutdown(&self) -> WrapResult<()> {
        let (cmd, rx) = EngineCommand::shutdown();
        self.send(cmd).await?;
        rx.await.map_err(|_| WrapError::ActorStopped)
    }
}
