mod config_commands;
mod vault_commands;

use std::path::PathBuf;

use {
    cairn_metrics::{MetricsRecorderConfig, init_metrics},
    clap::{Parser, Subcommand},
    secrecy::SecretString,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "cairn", version, about = "cairn: encrypted vaults that sync between devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./cairn.toml and ~/.config/cairn/).
    #[arg(long, global = true, env = "CAIRN_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "CAIRN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Vault to operate on.
    #[arg(long, global = true, env = "CAIRN_VAULT", default_value = "default")]
    vault: String,

    /// Password the vault key is derived from.
    #[arg(long, global = true, env = "CAIRN_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Vault(vault_commands::VaultAction),
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Logs go to stderr so command output on stdout stays pipeable.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "cairn starting");

    let mut config = match &cli.config {
        Some(path) => cairn_config::load_config(path)?,
        None => cairn_config::discover_and_load(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config.metrics.labels.clone().into_iter().collect(),
    })?;

    let result = match cli.command {
        Commands::Vault(action) => {
            let ctx = vault_commands::Context {
                config: config.clone(),
                vault: cli.vault,
                password: cli.password.map(SecretString::new),
            };
            vault_commands::handle_vault(action, &ctx).await
        },
        Commands::Config { action } => {
            config_commands::handle_config(action, cli.config.as_deref(), &config)
        },
    };

    if config.metrics.enabled
        && let Some(path) = &config.metrics.textfile
    {
        std::fs::write(path, metrics.render())?;
        debug!(path = %path.display(), "metrics written");
    }
    result
}
