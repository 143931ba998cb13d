//! Config schema types.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub kdf: KdfConfig,
    pub metrics: MetricsConfig,
}

impl CairnConfig {
    /// Database path: `storage.path`, else `<data_dir>/vaults.db`.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.path {
            return path.clone();
        }
        self.data_dir
            .clone()
            .or_else(crate::loader::data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vaults.db")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// SQLite file; defaults to `vaults.db` in the data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncModeKind {
    #[default]
    Manual,
    Periodic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub mode: SyncModeKind,
    /// Seconds between rounds in periodic mode.
    pub interval_secs: u64,
    /// Other cairn databases to exchange with, by path.
    pub peers: Vec<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncModeKind::Manual,
            interval_secs: 30,
            peers: Vec::new(),
        }
    }
}

/// Argon2id cost for password-derived keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Labels attached to every metric.
    pub labels: BTreeMap<String, String>,
    /// Prometheus text file written after each command, for a node
    /// exporter textfile collector.
    pub textfile: Option<PathBuf>,
}
