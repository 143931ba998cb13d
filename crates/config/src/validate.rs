//! Configuration validation.
//!
//! Detects unknown or misspelled fields in a config file and values the
//! vault cannot use. Files in any supported format are checked through a
//! JSON view of their contents.

use std::path::{Path, PathBuf};

use crate::schema::{BackendKind, CairnConfig, SyncModeKind};

/// Argon2 needs at least 8 KiB of memory per lane.
const MIN_KIB_PER_LANE: u32 = 8;
/// Below this much memory a password-derived key is considered weak.
const WEAK_M_COST_KIB: u32 = 19 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "sync.interval_secs"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(severity: Severity, path: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(&'static [(&'static str, KnownKeys)]),
    /// Free-form keys, e.g. metric labels.
    Map,
    Leaf,
}

const SCHEMA: KnownKeys = KnownKeys::Struct(&[
    ("data_dir", KnownKeys::Leaf),
    (
        "storage",
        KnownKeys::Struct(&[("backend", KnownKeys::Leaf), ("path", KnownKeys::Leaf)]),
    ),
    (
        "sync",
        KnownKeys::Struct(&[
            ("mode", KnownKeys::Leaf),
            ("interval_secs", KnownKeys::Leaf),
            ("peers", KnownKeys::Leaf),
        ]),
    ),
    (
        "kdf",
        KnownKeys::Struct(&[
            ("m_cost", KnownKeys::Leaf),
            ("t_cost", KnownKeys::Leaf),
            ("p_cost", KnownKeys::Leaf),
        ]),
    ),
    (
        "metrics",
        KnownKeys::Struct(&[
            ("enabled", KnownKeys::Leaf),
            ("labels", KnownKeys::Map),
            ("textfile", KnownKeys::Leaf),
        ]),
    ),
]);

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(path) = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file)
    else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => crate::env_subst::substitute_env(&raw),
        Err(e) => {
            return ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "",
                    format!("failed to read config file: {e}"),
                )],
                config_path: Some(path),
            };
        },
    };
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let mut result = validate_str(&raw, ext);
    result.config_path = Some(path);
    result
}

/// Validate config text in the format named by `ext`.
#[must_use]
pub fn validate_str(raw: &str, ext: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    let value: serde_json::Value = match parse_value(raw, ext) {
        Ok(v) => v,
        Err(e) => {
            result
                .diagnostics
                .push(Diagnostic::new(Severity::Error, "", format!("syntax error: {e}")));
            return result;
        },
    };

    check_unknown_fields(&value, &SCHEMA, "", &mut result.diagnostics);

    match serde_json::from_value::<CairnConfig>(value) {
        Ok(config) => result.diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => result
            .diagnostics
            .push(Diagnostic::new(Severity::Error, "", format!("type error: {e}"))),
    }
    result
}

fn parse_value(raw: &str, ext: &str) -> anyhow::Result<serde_json::Value> {
    match ext {
        "toml" => Ok(serde_json::to_value(toml::from_str::<toml::Value>(raw)?)?),
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            // An empty YAML document is an empty config.
            if v.is_null() {
                return Ok(serde_json::Value::Object(Default::default()));
            }
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let names: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.iter().find(|(name, _)| name == key) {
            Some((_, child_schema)) => {
                check_unknown_fields(child, child_schema, &path, diagnostics);
            },
            None => {
                let message = match suggest(key, &names, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(Severity::Warning, &path, message));
            },
        }
    }
}

/// Semantic checks on a parsed config. Errors name values the loader
/// replaces with defaults.
#[must_use]
pub fn validate_config(config: &CairnConfig) -> ValidationResult {
    let mut diags = Vec::new();

    if config.sync.mode == SyncModeKind::Periodic && config.sync.interval_secs == 0 {
        diags.push(Diagnostic::new(
            Severity::Error,
            "sync.interval_secs",
            "periodic sync needs an interval of at least one second",
        ));
    }
    if config.metrics.textfile.is_some() && !config.metrics.enabled {
        diags.push(Diagnostic::new(
            Severity::Info,
            "metrics.textfile",
            "not written while metrics are disabled",
        ));
    }
    if config.storage.backend == BackendKind::Memory {
        if config.storage.path.is_some() {
            diags.push(Diagnostic::new(
                Severity::Warning,
                "storage.path",
                "ignored by the memory backend",
            ));
        }
        if !config.sync.peers.is_empty() {
            diags.push(Diagnostic::new(
                Severity::Warning,
                "sync.peers",
                "vaults in memory are lost on exit; syncing them only helps the peers",
            ));
        }
    }
    let db = config.database_path();
    if config.sync.peers.iter().any(|p| *p == db) {
        diags.push(Diagnostic::new(
            Severity::Warning,
            "sync.peers",
            "lists this device's own database",
        ));
    }

    let kdf = &config.kdf;
    if kdf.t_cost == 0 || kdf.p_cost == 0 {
        diags.push(Diagnostic::new(
            Severity::Error,
            "kdf",
            "t_cost and p_cost must be at least 1",
        ));
    } else if kdf.m_cost < MIN_KIB_PER_LANE.saturating_mul(kdf.p_cost) {
        diags.push(Diagnostic::new(
            Severity::Error,
            "kdf.m_cost",
            format!("must be at least {MIN_KIB_PER_LANE} KiB per lane"),
        ));
    } else if kdf.m_cost < WEAK_M_COST_KIB {
        diags.push(Diagnostic::new(
            Severity::Warning,
            "kdf.m_cost",
            format!("below {WEAK_M_COST_KIB} KiB; password-derived keys are easy to brute force"),
        ));
    }

    ValidationResult {
        diagnostics: diags,
        config_path: None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn paths(result: &ValidationResult, severity: Severity) -> Vec<&str> {
        let mut paths: Vec<&str> = result
            .diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.path.as_str())
            .collect();
        paths.sort_unstable();
        paths
    }

    fn message_for<'a>(result: &'a ValidationResult, path: &str) -> &'a str {
        result
            .diagnostics
            .iter()
            .find(|d| d.path == path)
            .map(|d| d.message.as_str())
            .unwrap()
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("sync", "sync"), 0);
        assert_eq!(levenshtein("", "kdf"), 3);
        assert_eq!(levenshtein("synk", "sync"), 1);
        assert_eq!(levenshtein("storag", "storage"), 1);
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_str("", "toml");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!(validate_str("", "yaml").diagnostics.is_empty());
    }

    #[test]
    fn unknown_fields_get_suggestions() {
        let result = validate_str("[sync]\nintervl_secs = 5\n\n[storag]\n", "toml");
        assert_eq!(paths(&result, Severity::Warning), vec![
            "storag",
            "sync.intervl_secs"
        ]);
        assert!(message_for(&result, "storag").contains("\"storage\""));
        assert!(message_for(&result, "sync.intervl_secs").contains("\"interval_secs\""));
    }

    #[test]
    fn metric_labels_are_free_form() {
        let result = validate_str("[metrics.labels]\ndevice = \"laptop\"\n", "toml");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn syntax_and_type_errors() {
        assert!(validate_str("[sync", "toml").has_errors());
        assert!(validate_str(r#"{"sync": {"mode": "hourly"}}"#, "json").has_errors());
    }

    #[test]
    fn zero_interval_in_periodic_mode_is_an_error() {
        let result = validate_str("[sync]\nmode = \"periodic\"\ninterval_secs = 0\n", "toml");
        assert_eq!(paths(&result, Severity::Error), vec!["sync.interval_secs"]);

        let manual = validate_str("[sync]\ninterval_secs = 0\n", "toml");
        assert!(!manual.has_errors());
    }

    #[test]
    fn kdf_costs_are_checked() {
        let result = validate_str("[kdf]\nt_cost = 0\n", "toml");
        assert_eq!(paths(&result, Severity::Error), vec!["kdf"]);

        let result = validate_str("[kdf]\nm_cost = 8\np_cost = 4\n", "toml");
        assert_eq!(paths(&result, Severity::Error), vec!["kdf.m_cost"]);

        let result = validate_str("[kdf]\nm_cost = 4096\n", "toml");
        assert_eq!(paths(&result, Severity::Warning), vec!["kdf.m_cost"]);
    }

    #[test]
    fn memory_backend_warnings() {
        let result = validate_str(
            "[storage]\nbackend = \"memory\"\npath = \"/tmp/x.db\"\n[sync]\npeers = [\"/tmp/y.db\"]\n",
            "toml",
        );
        assert_eq!(paths(&result, Severity::Warning), vec![
            "storage.path",
            "sync.peers"
        ]);
    }

    #[test]
    fn own_database_as_peer_is_flagged() {
        let result = validate_str(
            "[storage]\npath = \"/tmp/me.db\"\n[sync]\npeers = [\"/tmp/me.db\"]\n",
            "toml",
        );
        assert_eq!(paths(&result, Severity::Warning), vec!["sync.peers"]);
    }

    #[test]
    fn suggest_ignores_distant_names() {
        assert_eq!(suggest("zzzzzz", &["sync", "kdf"], 3), None);
        assert_eq!(suggest("kfd", &["sync", "kdf"], 3), Some("kdf"));
    }
}
