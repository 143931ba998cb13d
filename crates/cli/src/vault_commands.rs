use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context as _, Result},
    base64::{Engine as _, engine::general_purpose::STANDARD as B64},
    cairn_config::{BackendKind, CairnConfig},
    cairn_crypto::KdfParams,
    cairn_replica::{DELTA_FORMAT_VERSION, Delta, StateVector},
    cairn_vault::{
        BackendOptions, KeySource, LocalPeer, StoreOptions, SyncMode, SyncedVault, VaultStore,
    },
    clap::Subcommand,
    secrecy::{ExposeSecret, SecretString},
    tracing::{info, warn},
};

#[derive(Subcommand)]
pub enum VaultAction {
    /// Store a value. Valid JSON is stored as JSON, anything else as a string.
    Put { key: String, value: String },
    /// Print a value as JSON.
    Get { key: String },
    /// Remove a key.
    Delete { key: String },
    /// List keys.
    List {
        /// Show version and last update time.
        #[arg(long, short)]
        long: bool,
    },
    /// Print this device's state vector as JSON.
    StateVector,
    /// Write the operations a peer is missing.
    ExportDelta {
        /// State vector file of the receiving peer ("-" for stdin). Without
        /// it the full history is exported.
        #[arg(long)]
        since: Option<PathBuf>,
        /// Write raw bytes here instead of base64 on stdout.
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Apply a delta file, raw or base64 ("-" for stdin).
    ApplyDelta {
        input: PathBuf,
        /// Replica that produced the delta, for logs and events.
        #[arg(long)]
        origin: Option<String>,
    },
    /// List vaults in the database.
    Vaults,
    /// Exchange changes with other cairn databases.
    Sync {
        /// Peer database; repeatable. Added to `sync.peers` from the config.
        #[arg(long = "peer")]
        peers: Vec<PathBuf>,
    },
}

pub struct Context {
    pub config: CairnConfig,
    pub vault: String,
    pub password: Option<SecretString>,
}

impl Context {
    fn key_source(&self, salt: Option<Vec<u8>>) -> Result<KeySource> {
        let password = self
            .password
            .as_ref()
            .context("a password is required: pass --password or set CAIRN_PASSWORD")?;
        Ok(KeySource::Password {
            password: SecretString::new(password.expose_secret().clone()),
            salt,
        })
    }

    fn kdf(&self) -> KdfParams {
        KdfParams {
            m_cost: self.config.kdf.m_cost,
            t_cost: self.config.kdf.t_cost,
            p_cost: self.config.kdf.p_cost,
        }
    }

    fn store_options(&self) -> Result<StoreOptions> {
        let backend = match self.config.storage.backend {
            BackendKind::Memory => BackendOptions::Memory,
            BackendKind::Sqlite => sqlite_backend(self.config.database_path())?,
        };
        Ok(StoreOptions {
            backend,
            sync: SyncMode::Manual,
            kdf: self.kdf(),
        })
    }
}

fn sqlite_backend(path: PathBuf) -> Result<BackendOptions> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(BackendOptions::Sqlite { path })
}

pub async fn handle_vault(action: VaultAction, ctx: &Context) -> Result<()> {
    let store = VaultStore::open(ctx.store_options()?).await?;
    let result = run(action, ctx, &store).await;
    store.close().await?;
    result
}

async fn run(action: VaultAction, ctx: &Context, store: &VaultStore) -> Result<()> {
    if let VaultAction::Vaults = action {
        for name in store.stored_vault_names().await? {
            println!("{name}");
        }
        return Ok(());
    }

    let vault = store.open_or_create(&ctx.vault, ctx.key_source(None)?).await?;
    match action {
        VaultAction::Put { key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            let item = vault.put(&key, value).await?;
            println!("{} v{}", item.key, item.version);
        },
        VaultAction::Get { key } => {
            let value = vault
                .get::<serde_json::Value>(&key)
                .await?
                .with_context(|| format!("{key}: not found"))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        },
        VaultAction::Delete { key } => {
            if !vault.delete(&key).await? {
                anyhow::bail!("{key}: not found");
            }
        },
        VaultAction::List { long } => {
            for key in vault.keys().await? {
                match vault.entry(&key).await? {
                    Some(entry) if long => println!(
                        "{key}\tv{}\t{}",
                        entry.version,
                        entry.updated_at.to_rfc3339()
                    ),
                    _ => println!("{key}"),
                }
            }
        },
        VaultAction::StateVector => {
            let sv = vault.state_vector().await;
            println!("{}", String::from_utf8(sv.to_bytes()?)?);
        },
        VaultAction::ExportDelta { since, out } => {
            let since = match since {
                Some(path) => StateVector::from_bytes(&read_input(&path)?)?,
                None => StateVector::new(),
            };
            let delta = vault.updates_since(&since).await?;
            info!(vault = %vault.name(), bytes = delta.len(), "delta exported");
            match out {
                Some(path) => std::fs::write(&path, delta.as_bytes())
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{}", B64.encode(delta.as_bytes())),
            }
        },
        VaultAction::ApplyDelta { input, origin } => {
            let delta = decode_delta(read_input(&input)?)?;
            let applied = vault.apply_update(&delta, origin.as_deref()).await?;
            println!(
                "integrated {} op(s), {} change(s), {} pending",
                applied.integrated.len(),
                applied.changes.len(),
                applied.pending
            );
        },
        VaultAction::Sync { peers } => sync(ctx, &vault, peers).await?,
        VaultAction::Vaults => {},
    }
    Ok(())
}

/// Open each peer database as a local peer of `vault` and run one round.
async fn sync(ctx: &Context, vault: &Arc<SyncedVault>, extra: Vec<PathBuf>) -> Result<()> {
    let mut paths = ctx.config.sync.peers.clone();
    for path in extra {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        anyhow::bail!("no peers: pass --peer or set sync.peers");
    }

    // Peers must derive the same key, so they share this vault's salt.
    let salt = vault.vault().kdf_salt().await?;
    let mut stores = Vec::with_capacity(paths.len());
    for path in &paths {
        match open_peer(ctx, path, salt.clone()).await {
            Ok((store, peer)) => {
                vault.add_peer(Arc::new(LocalPeer::new(peer))).await;
                stores.push(store);
            },
            Err(e) => warn!(peer = %path.display(), error = %e, "skipping peer"),
        }
    }

    let report = vault.sync_round().await;
    for store in &stores {
        store.close().await?;
    }
    println!(
        "reached {} peer(s), {} failed, integrated {} op(s)",
        report.peers_reached,
        report.peers_failed + paths.len() - stores.len(),
        report.integrated
    );
    Ok(())
}

async fn open_peer(
    ctx: &Context,
    path: &Path,
    salt: Option<Vec<u8>>,
) -> Result<(VaultStore, Arc<SyncedVault>)> {
    let key = ctx.key_source(salt)?;
    let store = VaultStore::open(StoreOptions {
        backend: sqlite_backend(path.to_path_buf())?,
        sync: SyncMode::Manual,
        kdf: ctx.kdf(),
    })
    .await?;
    match store.open_or_create(&ctx.vault, key).await {
        Ok(peer) => Ok((store, peer)),
        Err(e) => {
            store.close().await?;
            Err(e.into())
        },
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Raw deltas start with the format byte; anything else is taken as base64.
fn decode_delta(bytes: Vec<u8>) -> Result<Delta> {
    if bytes.first() == Some(&DELTA_FORMAT_VERSION) {
        return Ok(Delta::from_bytes(bytes));
    }
    let text = String::from_utf8(bytes).context("delta is neither raw nor base64")?;
    let raw = B64
        .decode(text.trim())
        .context("delta is neither raw nor base64")?;
    Ok(Delta::from_bytes(raw))
}
