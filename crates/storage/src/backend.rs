//! Closed choice of storage backend, fixed at construction.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use {async_trait::async_trait, sqlx::SqlitePool};

use crate::{
    Result,
    entry::{JournalRecord, VaultEntry, WriteBatch},
    store::EntryStore,
    store_memory::MemoryStore,
    store_sqlite::SqliteStore,
};

/// The storage a vault writes to.
pub enum StorageBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl StorageBackend {
    pub fn memory(namespace: impl Into<String>) -> Self {
        Self::Memory(MemoryStore::new(namespace))
    }

    /// Namespace `namespace` inside a shared, migrated pool.
    pub fn sqlite(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self::Sqlite(SqliteStore::with_pool(pool, namespace))
    }

    /// Open a dedicated database file for `namespace`.
    pub async fn sqlite_file(path: &Path, namespace: impl Into<String>) -> Result<Self> {
        Ok(Self::Sqlite(SqliteStore::open(path, namespace).await?))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Self::Memory($store) => $call,
            Self::Sqlite($store) => $call,
        }
    };
}

#[async_trait]
impl EntryStore for StorageBackend {
    fn namespace(&self) -> &str {
        dispatch!(self, s => s.namespace())
    }

    async fn get(&self, key: &str) -> Result<Option<VaultEntry>> {
        dispatch!(self, s => s.get(key).await)
    }

    async fn put(&self, key: &str, entry: &VaultEntry) -> Result<()> {
        #[cfg(feature = "metrics")]
        cairn_metrics::counter!(
            cairn_metrics::storage::WRITES_TOTAL,
            cairn_metrics::labels::BACKEND => self.kind()
        )
        .increment(1);
        dispatch!(self, s => s.put(key, entry).await)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        dispatch!(self, s => s.delete(key).await)
    }

    async fn keys(&self) -> Result<BTreeSet<String>> {
        dispatch!(self, s => s.keys().await)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        dispatch!(self, s => s.has(key).await)
    }

    async fn get_all(&self) -> Result<BTreeMap<String, VaultEntry>> {
        dispatch!(self, s => s.get_all().await)
    }

    async fn import_all(&self, entries: &BTreeMap<String, VaultEntry>) -> Result<()> {
        #[cfg(feature = "metrics")]
        cairn_metrics::counter!(
            cairn_metrics::storage::WRITES_TOTAL,
            cairn_metrics::labels::BACKEND => self.kind()
        )
        .increment(entries.len() as u64);
        dispatch!(self, s => s.import_all(entries).await)
    }

    async fn clear(&self) -> Result<()> {
        dispatch!(self, s => s.clear().await)
    }

    async fn append_journal(&self, records: &[JournalRecord]) -> Result<()> {
        dispatch!(self, s => s.append_journal(records).await)
    }

    async fn load_journal(&self) -> Result<Vec<JournalRecord>> {
        dispatch!(self, s => s.load_journal().await)
    }

    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        #[cfg(feature = "metrics")]
        cairn_metrics::counter!(
            cairn_metrics::storage::WRITES_TOTAL,
            cairn_metrics::labels::BACKEND => self.kind()
        )
        .increment((batch.upserts.len() + batch.deletes.len()) as u64);
        dispatch!(self, s => s.write_batch(batch).await)
    }

    async fn get_meta(&self, name: &str) -> Result<Option<String>> {
        dispatch!(self, s => s.get_meta(name).await)
    }

    async fn set_meta(&self, name: &str, value: &str) -> Result<()> {
        dispatch!(self, s => s.set_meta(name, value).await)
    }

    async fn close(&self) {
        dispatch!(self, s => s.close().await)
    }
}
