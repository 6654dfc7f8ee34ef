//! Manager configuration.

use crate::error::{ManagerError, ManagerResult};
use opsledger_storage::{KvBackend, MemoryBackend, SqliteBackend};
use opsledger_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Where the local store keeps its data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Volatile; lost when the process exits.
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

impl StorageConfig {
    /// Opens the configured backend.
    pub fn open(&self) -> ManagerResult<Arc<dyn KvBackend>> {
        Ok(match self {
            StorageConfig::Memory => Arc::new(MemoryBackend::new()),
            StorageConfig::Sqlite { path } => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| ManagerError::Storage(e.into()))?;
                }
                Arc::new(SqliteBackend::open(path)?)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Label written to logs; not sent to the remote.
    pub device_name: String,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    /// Events buffered per subscriber before slow subscribers start
    /// missing them.
    pub event_buffer: usize,
    /// Drop synced entries from the change log after every sync pass.
    pub archive_synced_changes: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            device_name: "this-device".to_string(),
            storage: StorageConfig::Memory,
            sync: SyncConfig::default(),
            event_buffer: 256,
            archive_synced_changes: false,
        }
    }
}

impl ManagerConfig {
    /// Parses and validates a JSON config. Missing keys take defaults.
    pub fn from_json(json: &str) -> ManagerResult<Self> {
        let config: ManagerConfig =
            serde_json::from_str(json).map_err(|e| ManagerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ManagerResult<()> {
        if self.event_buffer == 0 {
            return Err(ManagerError::Config("event_buffer must be at least 1".into()));
        }
        if self.sync.batch_size == 0 {
            return Err(ManagerError::Config("sync.batch_size must be at least 1".into()));
        }
        if self.sync.request_timeout_ms == 0 {
            return Err(ManagerError::Config("sync.request_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
