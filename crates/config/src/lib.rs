//! Configuration loading, validation, and env substitution.
//!
//! Config files: `cairn.toml`, `cairn.yaml`, `cairn.yml`, or `cairn.json`
//! Searched in `./` then `~/.config/cairn/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, find_config_file, load_config},
    schema::{
        BackendKind, CairnConfig, KdfConfig, MetricsConfig, StorageConfig, SyncConfig,
        SyncModeKind,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
