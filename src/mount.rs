//! Mount command interface used by the unwind maneuver, plus a simulator.
//!
//! Only the unwind maneuver drives the mount. Implementations are expected
//! to return once the commanded motion has completed (or failed); the
//! maneuver treats a successful return as confirmation of the step.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Motion commands the engine needs from a mount driver.
#[async_trait]
pub trait MountControl: Send + Sync {
    /// Slew to equatorial coordinates and wait for the slew to finish.
    ///
    /// # Errors
    /// - Target rejected (below horizon, outside limits)
    /// - Communication failure or timeout
    async fn slew_to(&self, ra_hours: f64, dec_degrees: f64) -> Result<()>;

    /// Move to the home/park reference position and wait for arrival.
    async fn go_home(&self) -> Result<()>;
}

/// Command recorded by [`MockMount`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MountCommand {
    /// `slew_to(ra, dec)`
    SlewTo {
        /// Target RA, hours.
        ra_hours: f64,
        /// Target Dec, degrees.
        dec_degrees: f64,
    },
    /// `go_home()`
    GoHome,
}

/// Simulated mount with configurable timing and failure injection.
///
/// # Example
///
/// ```rust,ignore
/// let mount = MockMount::new().failing_on_command(3);
/// mount.slew_to(5.0, 45.0).await?;
/// assert_eq!(mount.commands().await.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockMount {
    commands: Arc<RwLock<Vec<MountCommand>>>,
    slew_time: Duration,
    jitter: Duration,
    fail_on: Option<usize>,
}

impl MockMount {
    /// Instant mount that never fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Each command takes `slew_time` plus up to `jitter` extra.
    pub fn with_timing(mut self, slew_time: Duration, jitter: Duration) -> Self {
        self.slew_time = slew_time;
        self.jitter = jitter;
        self
    }

    /// Fail the `n`th command (1-based).
    pub fn failing_on_command(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Every command received so far.
    pub async fn commands(&self) -> Vec<MountCommand> {
        self.commands.read().await.clone()
    }

    async fn execute(&self, command: MountCommand) -> Result<()> {
        let number = {
            let mut commands = self.commands.write().await;
            commands.push(command);
            commands.len()
        };

        let delay = if self.jitter.is_zero() {
            self.slew_time
        } else {
            let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
            self.slew_time + Duration::from_millis(extra)
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }

        if self.fail_on == Some(number) {
            anyhow::bail!("MockMount: injected failure on command #{number} ({command:?})");
        }
        debug!(?command, "MockMount: command complete");
        Ok(())
    }
}

#[async_trait]
impl MountControl for MockMount {
    async fn slew_to(&self, ra_hours: f64, dec_degrees: f64) -> Result<()> {
        self.execute(MountCommand::SlewTo {
            ra_hours,
            dec_degrees,
        })
        .await
    }

    async fn go_home(&self) -> Result<()> {
        self.execute(MountCommand::GoHome).await
    }
}
