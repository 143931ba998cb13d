//! Owned registry of open vaults sharing one storage configuration.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use {
    cairn_crypto::KdfParams,
    cairn_storage::{EntryStore, StorageBackend},
    secrecy::SecretString,
    sqlx::SqlitePool,
    tokio::sync::RwLock,
    tracing::info,
    zeroize::Zeroizing,
};

use crate::{
    error::{Result, VaultError},
    synced::{SyncMode, SyncedVault},
    vault::{EncryptedVault, META_KEY_CHECK},
};

/// Where vault data lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendOptions {
    /// Process memory; gone when the vault is closed.
    #[default]
    Memory,
    /// One SQLite file shared by every vault of the store.
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub backend: BackendOptions,
    /// Sync mode applied to every vault when it is opened.
    pub sync: SyncMode,
    /// Argon2 cost for password-derived keys of new vaults.
    pub kdf: KdfParams,
}

/// How to obtain a vault's encryption key.
pub enum KeySource {
    Random,
    Password {
        password: SecretString,
        /// `None` reuses the vault's stored salt, or creates one.
        salt: Option<Vec<u8>>,
    },
    /// Raw key material; must be 32 bytes.
    Raw(Zeroizing<Vec<u8>>),
}

impl KeySource {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: SecretString::new(password.into()),
            salt: None,
        }
    }

    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Raw(Zeroizing::new(bytes.into()))
    }
}

pub struct VaultStore {
    options: StoreOptions,
    pool: Option<SqlitePool>,
    vaults: RwLock<BTreeMap<String, Arc<SyncedVault>>>,
}

impl VaultStore {
    /// Build a store. For SQLite the database is opened (and migrated) once.
    pub async fn open(options: StoreOptions) -> Result<Self> {
        let pool = match &options.backend {
            BackendOptions::Memory => None,
            BackendOptions::Sqlite { path } => Some(cairn_storage::open_pool(path).await?),
        };
        Ok(Self {
            options,
            pool,
            vaults: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn backend(&self, name: &str) -> StorageBackend {
        match &self.pool {
            Some(pool) => StorageBackend::sqlite(pool.clone(), name),
            None => StorageBackend::memory(name),
        }
    }

    /// Whether `name` has a key installed in persistent storage.
    async fn is_persisted(&self, name: &str) -> Result<bool> {
        if self.pool.is_none() {
            return Ok(false);
        }
        Ok(self
            .backend(name)
            .get_meta(META_KEY_CHECK)
            .await?
            .is_some())
    }

    /// Create a new vault. Fails with `DuplicateVault` if `name` is open or
    /// already exists on disk.
    pub async fn create_vault(&self, name: &str, key: KeySource) -> Result<Arc<SyncedVault>> {
        let mut vaults = self.vaults.write().await;
        if vaults.contains_key(name) || self.is_persisted(name).await? {
            return Err(VaultError::DuplicateVault {
                name: name.to_string(),
            });
        }
        let vault = self.init(name, key).await?;
        vaults.insert(name.to_string(), Arc::clone(&vault));
        info!(vault = name, "vault created");
        Ok(vault)
    }

    /// Open an existing vault. Fails with `UnknownVault` if nothing is stored
    /// under `name`, and with `DuplicateVault` if it is already open.
    pub async fn open_vault(&self, name: &str, key: KeySource) -> Result<Arc<SyncedVault>> {
        let mut vaults = self.vaults.write().await;
        if vaults.contains_key(name) {
            return Err(VaultError::DuplicateVault {
                name: name.to_string(),
            });
        }
        if !self.is_persisted(name).await? {
            return Err(VaultError::UnknownVault {
                name: name.to_string(),
            });
        }
        let vault = self.init(name, key).await?;
        vaults.insert(name.to_string(), Arc::clone(&vault));
        info!(vault = name, "vault opened");
        Ok(vault)
    }

    /// Open `name` if it exists, create it otherwise.
    pub async fn open_or_create(&self, name: &str, key: KeySource) -> Result<Arc<SyncedVault>> {
        if let Some(vault) = self.vault(name).await {
            return Ok(vault);
        }
        if self.is_persisted(name).await? {
            self.open_vault(name, key).await
        } else {
            self.create_vault(name, key).await
        }
    }

    async fn init(&self, name: &str, key: KeySource) -> Result<Arc<SyncedVault>> {
        let vault =
            EncryptedVault::new(name, self.backend(name)).with_kdf_params(self.options.kdf.clone());
        match key {
            KeySource::Random => vault.init_with_random_key().await?,
            KeySource::Password { password, salt } => {
                vault.init_with_password(&password, salt.as_deref()).await?;
            },
            KeySource::Raw(bytes) => vault.init_with_key(&bytes).await?,
        }
        let synced = SyncedVault::open(vault).await?;
        if let SyncMode::Periodic { .. } = self.options.sync {
            synced.start_sync(self.options.sync).await;
        }
        Ok(synced)
    }

    /// An open vault by name.
    pub async fn vault(&self, name: &str) -> Option<Arc<SyncedVault>> {
        self.vaults.read().await.get(name).cloned()
    }

    /// Names of open vaults, sorted.
    pub async fn vault_names(&self) -> Vec<String> {
        self.vaults.read().await.keys().cloned().collect()
    }

    /// Names of every vault in persistent storage, open or not.
    pub async fn stored_vault_names(&self) -> Result<Vec<String>> {
        match &self.pool {
            Some(pool) => Ok(cairn_storage::list_namespaces(pool).await?),
            None => Ok(self.vault_names().await),
        }
    }

    /// Close one vault: stop its sync, zero its key. Returns whether it was
    /// open.
    pub async fn close_vault(&self, name: &str) -> Result<bool> {
        let Some(vault) = self.vaults.write().await.remove(name) else {
            return Ok(false);
        };
        vault.destroy().await?;
        info!(vault = name, "vault closed");
        Ok(true)
    }

    /// Close every vault and the shared database.
    pub async fn close(&self) -> Result<()> {
        let vaults = std::mem::take(&mut *self.vaults.write().await);
        for (name, vault) in vaults {
            vault.destroy().await?;
            info!(vault = %name, "vault closed");
        }
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        Ok(())
    }
}
