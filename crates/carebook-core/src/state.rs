//! Persisted application state.
//!
//! A small JSON document that survives restarts: who is logged in, user
//! settings, the last successful sync and a few UI preferences. Loading never
//! fails. Each top-level key (and each settings field) is decoded on its own,
//! so one bad value only resets that value.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::identifier::PeriodGranularity;

pub const MIN_SYNC_BATCH_SIZE: u32 = 1;
pub const MAX_SYNC_BATCH_SIZE: u32 = 500;
pub const DEFAULT_SYNC_BATCH_SIZE: u32 = 50;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StateResult<T> = Result<T, StateError>;

/// The logged-in clinician.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub auto_sync: bool,
    pub id_granularity: PeriodGranularity,
    pub language: String,
    pub sync_batch_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            id_granularity: PeriodGranularity::Month,
            language: "en".to_string(),
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }
}

impl Settings {
    fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            tracing::warn!("settings is not an object, using defaults");
            return Self::default();
        };
        let defaults = Self::default();
        let mut settings = Self {
            auto_sync: field(map, "auto_sync", defaults.auto_sync),
            id_granularity: field(map, "id_granularity", defaults.id_granularity),
            language: field(map, "language", defaults.language),
            sync_batch_size: defaults.sync_batch_size,
        };
        // Out-of-range sizes clamp rather than reset.
        if let Some(size) = map.get("sync_batch_size") {
            match size.as_i64() {
                Some(n) => settings.sync_batch_size = clamp_batch_size(n),
                None => tracing::warn!("ignoring malformed sync_batch_size"),
            }
        }
        settings
    }
}

pub fn clamp_batch_size(n: i64) -> u32 {
    n.clamp(MIN_SYNC_BATCH_SIZE as i64, MAX_SYNC_BATCH_SIZE as i64) as u32
}

/// Patient list filter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PatientFilter {
    #[default]
    All,
    Favorites,
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub current_user: Option<UserProfile>,
    pub settings: Settings,
    pub last_sync_time: Option<i64>,
    pub search_text: String,
    pub active_filter: PatientFilter,
}

impl AppSnapshot {
    /// Decode key by key, falling back per key.
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            tracing::warn!("state snapshot root is not an object, using defaults");
            return Self::default();
        };
        Self {
            current_user: field(map, "current_user", None),
            settings: map
                .get("settings")
                .map(Settings::from_value)
                .unwrap_or_default(),
            last_sync_time: field(map, "last_sync_time", None),
            search_text: field(map, "search_text", String::new()),
            active_filter: field(map, "active_filter", PatientFilter::All),
        }
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str, default: T) -> T {
    match map.get(key) {
        None => default,
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "ignoring malformed state value");
            default
        }),
    }
}

/// Owns the snapshot file.
#[derive(Debug, Clone)]
pub struct AppStateStore {
    path: PathBuf,
}

impl AppStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. Missing or corrupt files yield the default.
    pub fn load(&self) -> AppSnapshot {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no state snapshot yet");
                return AppSnapshot::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "state snapshot unreadable");
                return AppSnapshot::default();
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => AppSnapshot::from_value(&value),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "state snapshot corrupt");
                AppSnapshot::default()
            }
        }
    }

    /// Rewrite the whole file. The previous snapshot stays intact until the
    /// rename succeeds.
    pub fn save(&self, snapshot: &AppSnapshot) -> StateResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        tracing::info!(path = %self.path.display(), "state snapshot saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
