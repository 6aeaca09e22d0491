//! Engine settings persistence for the Autostep CLI.
//!
//! A tiny JSON-backed store holding defaults the command line falls back to
//! when a flag is not given: the monitor to capture and a log filter. The
//! file lives in the standard configuration directory
//! (`~/.config/autostep/settings.json` on most platforms) unless
//! `AUTOSTEP_SETTINGS_PATH` points elsewhere.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::expand_tilde;

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "AUTOSTEP_SETTINGS_PATH";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Error surfaced when reading or writing settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted setting values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Monitor captured by image steps when the CLI gets no `--monitor`.
    pub monitor_index: usize,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

/// Thread-safe settings store backed by a JSON file.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Mutex<EngineSettings>,
    persist_to_disk: bool,
}

impl SettingsStore {
    /// Load the store from the default (or overridden) path.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(default_settings_path())
    }

    /// Load the store from an explicit path. A missing file yields defaults.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = load_payload(&path)?;
        Ok(Self {
            path,
            settings: Mutex::new(settings),
            persist_to_disk: true,
        })
    }

    /// Build an in-memory store used when the config directory cannot be accessed.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            settings: Mutex::new(EngineSettings::default()),
            persist_to_disk: false,
        }
    }

    /// Path to the underlying JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False for [`SettingsStore::ephemeral`] stores, whose updates are never saved.
    pub fn is_persistent(&self) -> bool {
        self.persist_to_disk
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> EngineSettings {
        self.settings.lock().expect("settings lock poisoned").clone()
    }

    /// Apply `update` and persist the result.
    pub fn update(&self, update: impl FnOnce(&mut EngineSettings)) -> Result<(), SettingsError> {
        let mut settings = self.settings.lock().expect("settings lock poisoned");
        update(&mut settings);
        if self.persist_to_disk {
            self.save_locked(&settings)?;
        }
        Ok(())
    }

    fn save_locked(&self, settings: &EngineSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

fn default_settings_path() -> PathBuf {
    if let Ok(path) = env::var(SETTINGS_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autostep")
        .join(SETTINGS_FILE_NAME)
}

fn load_payload(path: &Path) -> Result<EngineSettings, SettingsError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(settings) => Ok(settings),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "Failed to parse settings file; using defaults"
                );
                Ok(EngineSettings::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(EngineSettings::default()),
        Err(error) => Err(SettingsError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load_from(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.settings(), EngineSettings::default());
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::load_from(&path).unwrap();
        store.update(|settings| settings.monitor_index = 2).unwrap();

        let reloaded = SettingsStore::load_from(&path).unwrap();
        assert_eq!(reloaded.settings().monitor_index, 2);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::load_from(&path).unwrap();
        assert_eq!(store.settings(), EngineSettings::default());
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "log_filter": "autostep_engine=debug" }"#).unwrap();
        let settings = SettingsStore::load_from(&path).unwrap().settings();
        assert_eq!(settings.log_filter.as_deref(), Some("autostep_engine=debug"));
        assert_eq!(settings.monitor_index, 0);
    }

    #[test]
    fn env_override_selects_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        temp_env::with_var(SETTINGS_PATH_ENV, Some(path.to_str().unwrap()), || {
            let store = SettingsStore::load().unwrap();
            assert_eq!(store.path(), path.as_path());
        });
    }

    #[test]
    fn ephemeral_store_does_not_touch_disk() {
        let store = SettingsStore::ephemeral();
        store.update(|settings| settings.monitor_index = 1).unwrap();
        assert_eq!(store.settings().monitor_index, 1);
        assert_eq!(store.path(), Path::new(""));
        assert!(!store.is_persistent());
    }
}
