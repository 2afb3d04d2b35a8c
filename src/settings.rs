// src/settings.rs

//! Persisted user preferences
//!
//! A small TOML file under the per-user configuration directory:
//!
//! ```toml
//! elevation_mode = "type_password_each_time"
//! open_app = "evince %f"
//! ocr_language = "eng"
//! ```
//!
//! Every key is optional and a missing file means defaults. Writes go
//! straight to disk; the last write wins.

use crate::error::{Error, Result};
use crate::privilege::ElevationMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SETTINGS_FILE: &str = "settings.toml";

/// User preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// How runtime access is elevated, unset until the user chooses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_mode: Option<ElevationMode>,
    /// Viewer command for the sanitized PDF
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_app: Option<String>,
    /// Last OCR language used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_language: Option<String>,
}

impl Settings {
    /// Parse settings from TOML
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Settings(e.to_string()))
    }

    /// Serialize settings to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Settings(e.to_string()))
    }
}

/// File-backed settings shared by all sessions
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<Settings>,
}

impl SettingsStore {
    /// Load settings from `dir`, falling back to defaults if there is no file yet
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        let current = match std::fs::read_to_string(&path) {
            Ok(content) => Settings::from_toml(&content)
                .map_err(|e| Error::Settings(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    /// The platform-conventional settings directory
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dangerzone"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    /// Apply a change and write it to disk before returning
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        let mut current = self.lock();
        let mut next = current.clone();
        change(&mut next);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, next.to_toml()?)?;
        debug!("Saved settings to {}", self.path.display());

        *current = next;
        Ok(())
    }

    pub fn elevation_mode(&self) -> Option<ElevationMode> {
        self.lock().elevation_mode
    }

    pub fn set_elevation_mode(&self, mode: ElevationMode) -> Result<()> {
        self.update(|s| s.elevation_mode = Some(mode))
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        // A panic while holding the lock cannot leave Settings half-written
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::open(dir.path()).unwrap();
        assert_eq!(store.get(), Settings::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_update_persists() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::open(dir.path()).unwrap();
        store
            .update(|s| {
                s.open_app = Some("evince %f".to_string());
                s.ocr_language = Some("deu".to_string());
            })
            .unwrap();
        store.set_elevation_mode(ElevationMode::JoinPrivilegedGroup).unwrap();

        let reopened = SettingsStore::open(dir.path()).unwrap();
        let settings = reopened.get();
        assert_eq!(settings.elevation_mode, Some(ElevationMode::JoinPrivilegedGroup));
        assert_eq!(settings.open_app.as_deref(), Some("evince %f"));
        assert_eq!(settings.ocr_language.as_deref(), Some("deu"));
    }

    #[test]
    fn test_parse_enum_key() {
        let settings = Settings::from_toml("elevation_mode = \"type_password_each_time\"\n").unwrap();
        assert_eq!(settings.elevation_mode, Some(ElevationMode::TypePasswordEachTime));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "elevation_mode = 3").unwrap();
        let err = SettingsStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Settings(_)));
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = SettingsStore::open(&nested).unwrap();
        store.set_elevation_mode(ElevationMode::TypePasswordEachTime).unwrap();
        assert!(nested.join(SETTINGS_FILE).exists());
    }
}
