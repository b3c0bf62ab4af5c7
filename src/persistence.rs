//! State and settings persistence.
//!
//! The engine talks to storage only through [`StateStore`]. The stock
//! implementation, [`JsonFileStore`], keeps two small pretty-printed JSON
//! files side by side:
//!
//! - `rotation_state.json`: the [`RotationState`] record
//! - `settings.json`: [`WrapSettings`], kept apart so a reset never loses them
//!
//! Writes go to a temporary sibling and are renamed into place, so a crash
//! mid-write leaves the previous file intact.
//!
//! [`PersistGate`] decides *when* to write: routine sample updates at most
//! once per save interval, significant events immediately.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::state::{RotationState, WrapSettings};

/// Storage backend for the persisted records.
///
/// `Ok(None)` from a load means nothing has been saved yet.
pub trait StateStore: Send + Sync {
    /// Load the accumulator record.
    fn load_state(&self) -> Result<Option<RotationState>, PersistenceError>;
    /// Save the accumulator record.
    fn save_state(&self, state: &RotationState) -> Result<(), PersistenceError>;
    /// Load user settings.
    fn load_settings(&self) -> Result<Option<WrapSettings>, PersistenceError>;
    /// Save user settings.
    fn save_settings(&self, settings: &WrapSettings) -> Result<(), PersistenceError>;
}

/// Load the state record, falling back to a fresh one on any failure.
pub fn load_state_or_default(store: &dyn StateStore, now: DateTime<Utc>) -> RotationState {
    match store.load_state() {
        Ok(Some(state)) => state,
        Ok(None) => {
            debug!("No saved rotation state; starting from zero");
            RotationState::zeroed(now)
        }
        Err(e) => {
            warn!(error = %e, "Could not load rotation state; starting from zero");
            RotationState::zeroed(now)
        }
    }
}

/// Load settings, falling back to defaults on any failure.
pub fn load_settings_or_default(store: &dyn StateStore) -> WrapSettings {
    match store.load_settings() {
        Ok(Some(settings)) => settings.sanitized(),
        Ok(None) => WrapSettings::default(),
        Err(e) => {
            warn!(error = %e, "Could not load settings; using defaults");
            WrapSettings::default()
        }
    }
}

/// JSON files on local disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    state_path: PathBuf,
    settings_path: PathBuf,
}

impl JsonFileStore {
    /// Store with explicit file paths.
    pub fn new(state_path: impl Into<PathBuf>, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            settings_path: settings_path.into(),
        }
    }

    /// Store using the default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join("rotation_state.json"), dir.join("settings.json"))
    }

    /// Path of the state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Path of the settings file.
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| PersistenceError::Format {
            path: path.display().to_string(),
            source,
        })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Format {
        path: path.display().to_string(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, text).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

impl StateStore for JsonFileStore {
    fn load_state(&self) -> Result<Option<RotationState>, PersistenceError> {
        read_json(&self.state_path)
    }

    fn save_state(&self, state: &RotationState) -> Result<(), PersistenceError> {
        write_json(&self.state_path, state)
    }

    fn load_settings(&self) -> Result<Option<WrapSettings>, PersistenceError> {
        read_json(&self.settings_path)
    }

    fn save_settings(&self, settings: &WrapSettings) -> Result<(), PersistenceError> {
        write_json(&self.settings_path, settings)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<RotationState>>,
    settings: Mutex<Option<WrapSettings>>,
    state_saves: Mutex<u32>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with a state record.
    pub fn with_state(state: RotationState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Last saved state record, if any.
    pub fn saved_state(&self) -> Option<RotationState> {
        lock(&self.state).clone()
    }

    /// Last saved settings, if any.
    pub fn saved_settings(&self) -> Option<WrapSettings> {
        *lock(&self.settings)
    }

    /// How many times the state record was written.
    pub fn state_save_count(&self) -> u32 {
        *lock(&self.state_saves)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl StateStore for MemoryStore {
    fn load_state(&self) -> Result<Option<RotationState>, PersistenceError> {
        Ok(lock(&self.state).clone())
    }

    fn save_state(&self, state: &RotationState) -> Result<(), PersistenceError> {
        *lock(&self.state) = Some(state.clone());
        *lock(&self.state_saves) += 1;
        Ok(())
    }

    fn load_settings(&self) -> Result<Option<WrapSettings>, PersistenceError> {
        Ok(*lock(&self.settings))
    }

    fn save_settings(&self, settings: &WrapSettings) -> Result<(), PersistenceError> {
        *lock(&self.settings) = Some(*settings);
        Ok(())
    }
}

/// Time gate for routine state writes.
#[derive(Debug, Clone)]
pub struct PersistGate {
    interval: chrono::Duration,
    last_saved: Option<DateTime<Utc>>,
    dirty: bool,
}

impl PersistGate {
    /// Gate allowing one routine write per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: chrono::Duration::from_std(interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            last_saved: None,
            dirty: false,
        }
    }

    /// Note that the in-memory state differs from disk.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Unsaved changes pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a routine write is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.dirty
            && match self.last_saved {
                None => true,
                Some(last) => now - last >= self.interval || now < last,
            }
    }

    /// Record a successful write.
    pub fn saved(&mut self, now: DateTime<Utc>) {
        self.dirty = false;
        self.last_saved = Some(now);
    }
}
