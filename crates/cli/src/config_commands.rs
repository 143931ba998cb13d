use std::path::Path;

use {
    anyhow::Result,
    cairn_config::{
        CairnConfig,
        validate::{self, Severity},
    },
    clap::Subcommand,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration as TOML.
    Show,
    /// Print the path of the config file in use.
    Path,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>, config: &CairnConfig) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        },
        ConfigAction::Path => {
            match path.map(Path::to_path_buf).or_else(cairn_config::find_config_file) {
                Some(p) => println!("{}", p.display()),
                None => eprintln!("No config file found; using defaults."),
            }
            Ok(())
        },
    }
}

fn paint(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "\x1b[1;31m",
        Severity::Warning => "\x1b[1;33m",
        Severity::Info => "\x1b[1;36m",
    }
}

const RESET: &str = "\x1b[0m";

/// Print diagnostics worst first; fails when any is an error.
fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let mut result = validate::validate(path);
    match &result.config_path {
        Some(path) => eprintln!("{}:", path.display()),
        None => eprintln!("(defaults):"),
    }

    result.diagnostics.sort_by_key(|d| d.severity);
    let visible = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info);
    for d in visible {
        let location = if d.path.is_empty() {
            String::new()
        } else {
            format!(" [{}]", d.path)
        };
        eprintln!("  {}{}{RESET}{location} {}", paint(d.severity), d.severity, d.message);
    }

    match (
        result.count(Severity::Error),
        result.count(Severity::Warning),
    ) {
        (0, 0) => eprintln!("  ok"),
        (0, warnings) => eprintln!("  {warnings} warning(s)"),
        (errors, warnings) => {
            eprintln!("  {errors} error(s), {warnings} warning(s)");
            anyhow::bail!("invalid configuration");
        },
    }
    Ok(())
}
