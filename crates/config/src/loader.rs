use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::CairnConfig,
    validate::{self, Severity},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["cairn.toml", "cairn.yaml", "cairn.yml", "cairn.json"];

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "cairn")
}

/// Load config from the given path (any supported format).
///
/// Validation findings are logged and invalid values are replaced by their
/// defaults; only unreadable or unparsable files are errors.
pub fn load_config(path: &Path) -> anyhow::Result<CairnConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    for diag in validate::validate_config(&config).diagnostics {
        warn!(path = %path.display(), field = %diag.path, severity = %diag.severity, "{}", diag.message);
        if diag.severity == Severity::Error {
            reset_to_default(&mut config, &diag.path);
        }
    }
    Ok(config)
}

fn reset_to_default(config: &mut CairnConfig, field: &str) {
    let defaults = CairnConfig::default();
    match field {
        "sync.interval_secs" => config.sync.interval_secs = defaults.sync.interval_secs,
        f if f.starts_with("kdf") => config.kdf = defaults.kdf,
        _ => return,
    }
    warn!(field, "using default value");
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./cairn.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/cairn/cairn.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CairnConfig::default()` if no config file is found or the file
/// found cannot be parsed.
pub fn discover_and_load() -> CairnConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    CairnConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    dirs.extend(config_dir());
    find_config_in(&dirs)
}

fn find_config_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/cairn/`).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Returns the platform data directory (`~/.local/share/cairn/` on Linux).
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CairnConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
