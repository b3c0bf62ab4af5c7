//! Engine configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (every key optional; missing keys take their defaults)
//! 2. environment variables prefixed with `CABLEWRAP_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! CABLEWRAP_APPLICATION__LOG_LEVEL=debug
//! CABLEWRAP_PERSISTENCE__SAVE_INTERVAL=10s
//! CABLEWRAP_UNWIND__MAX_STEP_DEG=45
//! ```
//!
//! Durations are humantime strings (`"5s"`, `"1h"`, `"250ms"`).

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::classifier::ClassifierConfig;
use crate::unwind::UnwindPlan;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Configuration render error: {0}")]
    RenderError(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Motion classifier tuning
    pub tracking: TrackingConfig,
    /// History log and display buffer
    pub history: HistoryConfig,
    /// State file locations and save cadence
    pub persistence: PersistenceConfig,
    /// Unwind maneuver limits
    pub unwind: UnwindConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory holding the state and settings files
    pub data_dir: Option<PathBuf>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: None,
        }
    }
}

/// Classifier thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum spacing between accumulated tracking samples
    #[serde(with = "humantime_serde")]
    pub tracking_sample_interval: Duration,
    /// Per-sample cap while tracking, degrees
    pub tracking_spike_cap_deg: f64,
    /// Per-tick cap while slewing, degrees
    pub slew_spike_cap_deg: f64,
    /// RA change that confirms a slew direction, hours
    pub direction_confidence_hours: f64,
    /// Smallest stopped-phase correction, degrees
    pub catch_up_min_deg: f64,
    /// Dwell at home before snapping
    #[serde(with = "humantime_serde")]
    pub home_settle: Duration,
    /// Residual below which a home snap is skipped
    pub snap_epsilon_deg: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        let classifier = ClassifierConfig::default();
        Self {
            tracking_sample_interval: classifier.tracking_sample_interval,
            tracking_spike_cap_deg: classifier.tracking_spike_cap_deg,
            slew_spike_cap_deg: classifier.slew_spike_cap_deg,
            direction_confidence_hours: classifier.direction_confidence_hours,
            catch_up_min_deg: classifier.catch_up_min_deg,
            home_settle: classifier.home_settle,
            snap_epsilon_deg: 0.01,
        }
    }
}

/// History retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// How long wrap events are kept
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Points kept for charting
    pub display_buffer_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            display_buffer_capacity: 720,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Minimum spacing between routine state writes
    #[serde(with = "humantime_serde")]
    pub save_interval: Duration,
    /// State file name, relative to the data directory
    pub state_file: PathBuf,
    /// Settings file name, relative to the data directory
    pub settings_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_interval: Duration::from_secs(30),
            state_file: PathBuf::from("rotation_state.json"),
            settings_file: PathBuf::from("settings.json"),
        }
    }
}

/// Unwind limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnwindConfig {
    /// Totals below this are treated as unwound
    pub min_remaining_deg: f64,
    /// Largest azimuth change per step
    pub max_step_deg: f64,
    /// Step budget per maneuver
    pub max_steps: u32,
    /// Altitude held while stepping
    pub safe_altitude_deg: f64,
    /// Pause after each step
    #[serde(with = "humantime_serde")]
    pub step_pause: Duration,
}

impl Default for UnwindConfig {
    fn default() -> Self {
        let plan = UnwindPlan::default();
        Self {
            min_remaining_deg: plan.min_remaining_deg,
            max_step_deg: plan.max_step_deg,
            max_steps: plan.max_steps,
            safe_altitude_deg: plan.safe_altitude_deg,
            step_pause: plan.step_pause,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Platform data directory for this application, falling back to the
/// working directory when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("cable-wrap"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl EngineConfig {
    /// Load configuration from a TOML file plus environment overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or a value fails
    /// validation.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CABLEWRAP_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let positive = [
            ("tracking.tracking_spike_cap_deg", self.tracking.tracking_spike_cap_deg),
            ("tracking.slew_spike_cap_deg", self.tracking.slew_spike_cap_deg),
            ("tracking.direction_confidence_hours", self.tracking.direction_confidence_hours),
            ("unwind.min_remaining_deg", self.unwind.min_remaining_deg),
            ("unwind.max_step_deg", self.unwind.max_step_deg),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "'{key}' must be a positive number, got {value}"
                )));
            }
        }

        for (key, value) in [
            ("tracking.catch_up_min_deg", self.tracking.catch_up_min_deg),
            ("tracking.snap_epsilon_deg", self.tracking.snap_epsilon_deg),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "'{key}' cannot be negative, got {value}"
                )));
            }
        }

        // Steps near 180° let the mount pick the short way round
        if self.unwind.max_step_deg >= 180.0 {
            return Err(ConfigError::ValidationError(format!(
                "'unwind.max_step_deg' must be below 180, got {}",
                self.unwind.max_step_deg
            )));
        }
        if !(0.0..90.0).contains(&self.unwind.safe_altitude_deg) {
            return Err(ConfigError::ValidationError(format!(
                "'unwind.safe_altitude_deg' must be in [0, 90), got {}",
                self.unwind.safe_altitude_deg
            )));
        }
        if self.unwind.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "'unwind.max_steps' must be at least 1".to_string(),
            ));
        }
        if self.history.display_buffer_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "'history.display_buffer_capacity' must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding the persisted files.
    pub fn data_dir(&self) -> PathBuf {
        self.application
            .data_dir
            .clone()
            .unwrap_or_else(default_data_dir)
    }

    /// Full path of the state file.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir().join(&self.persistence.state_file)
    }

    /// Full path of the settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir().join(&self.persistence.settings_file)
    }

    /// Classifier thresholds from the `[tracking]` section.
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            tracking_sample_interval: self.tracking.tracking_sample_interval,
            tracking_spike_cap_deg: self.tracking.tracking_spike_cap_deg,
            slew_spike_cap_deg: self.tracking.slew_spike_cap_deg,
            direction_confidence_hours: self.tracking.direction_confidence_hours,
            catch_up_min_deg: self.tracking.catch_up_min_deg,
            home_settle: self.tracking.home_settle,
        }
    }

    /// Maneuver limits from the `[unwind]` section.
    pub fn unwind_plan(&self) -> UnwindPlan {
        UnwindPlan {
            min_remaining_deg: self.unwind.min_remaining_deg,
            max_step_deg: self.unwind.max_step_deg,
            max_steps: self.unwind.max_steps,
            safe_altitude_deg: self.unwind.safe_altitude_deg,
            step_pause: self.unwind.step_pause,
        }
    }

    /// History retention as a calendar duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.history.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracking.tracking_sample_interval, Duration::from_secs(5));
        assert_eq!(config.unwind.max_step_deg, 60.0);
        assert_eq!(config.history.display_buffer_capacity, 720);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cable-wrap.toml");
        fs::write(
            &path,
            r#"
[application]
log_level = "debug"
data_dir = "/var/lib/cable-wrap"

[persistence]
save_interval = "10s"

[unwind]
max_step_deg = 45.0
"#,
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.persistence.save_interval, Duration::from_secs(10));
        assert_eq!(config.unwind.max_step_deg, 45.0);
        assert_eq!(config.unwind.max_steps, 20);
        assert_eq!(
            config.state_path(),
            PathBuf::from("/var/lib/cable-wrap/rotation_state.json")
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.tracking, TrackingConfig::default());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = EngineConfig::default();
        config.application.log_level = "loud".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_step_must_stay_below_half_turn() {
        let mut config = EngineConfig::default();
        config.unwind.max_step_deg = 200.0;
        assert!(config.validate().is_err());

        config.unwind.max_step_deg = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_toml_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rendered.toml");
        let mut config = EngineConfig::default();
        config.application.data_dir = Some(dir.path().to_path_buf());
        config.history.retention = Duration::from_secs(7200);

        let text = config.to_toml().unwrap();
        assert!(text.contains("retention = \"2h\""));
        fs::write(&path, text).unwrap();

        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_section_conversions() {
        let config = EngineConfig::default();
        assert_eq!(config.classifier_config(), ClassifierConfig::default());
        assert_eq!(config.unwind_plan(), UnwindPlan::default());
        assert_eq!(config.retention(), chrono::Duration::hours(1));
    }
}
