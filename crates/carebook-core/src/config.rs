//! Startup configuration supplied by the host.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::identifier::{IdGeneratorConfig, PeriodGranularity};
use crate::state::{clamp_batch_size, Settings, DEFAULT_SYNC_BATCH_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub id_tag: String,
    pub id_granularity: PeriodGranularity,
    pub sync_batch_size: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("carebook.sqlite3"),
            snapshot_path: PathBuf::from("carebook-state.json"),
            id_tag: "PT".to_string(),
            id_granularity: PeriodGranularity::Month,
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }
}

impl CoreConfig {
    /// Both files under one directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let defaults = Self::default();
        Self {
            database_path: dir.join(&defaults.database_path),
            snapshot_path: dir.join(&defaults.snapshot_path),
            ..defaults
        }
    }

    /// Settings a fresh install starts with.
    pub fn initial_settings(&self) -> Settings {
        Settings {
            id_granularity: self.id_granularity,
            sync_batch_size: clamp_batch_size(self.sync_batch_size as i64),
            ..Settings::default()
        }
    }

    /// Identifier settings; persisted settings win over config.
    pub fn id_generator(&self, settings: &Settings) -> IdGeneratorConfig {
        IdGeneratorConfig {
            tag: self.id_tag.clone(),
            granularity: settings.id_granularity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{ "id_tag": "CL", "id_granularity": "day" }"#).unwrap();
        assert_eq!(config.id_tag, "CL");
        assert_eq!(config.id_granularity, PeriodGranularity::Day);
        assert_eq!(config.sync_batch_size, DEFAULT_SYNC_BATCH_SIZE);
        assert_eq!(config.database_path, PathBuf::from("carebook.sqlite3"));
    }

    #[test]
    fn test_in_dir() {
        let config = CoreConfig::in_dir("/data/app");
        assert_eq!(
            config.database_path,
            PathBuf::from("/data/app/carebook.sqlite3")
        );
        assert_eq!(
            config.snapshot_path,
            PathBuf::from("/data/app/carebook-state.json")
        );
    }

    #[test]
    fn test_initial_settings_clamped() {
        let config = CoreConfig {
            sync_batch_size: 0,
            ..Default::default()
        };
        assert_eq!(config.initial_settings().sync_batch_size, 1);
    }
}
