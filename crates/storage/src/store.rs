//! Persistence trait shared by the storage backends.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::{
    Result,
    entry::{JournalRecord, VaultEntry, WriteBatch},
};

/// Namespaced store for encrypted entries, replication journal and metadata.
///
/// Every method only sees rows belonging to [`namespace`](Self::namespace).
#[async_trait]
pub trait EntryStore: Send + Sync {
    fn namespace(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<VaultEntry>>;
    /// Upsert. The stored entry's `key` is always `key`.
    async fn put(&self, key: &str, entry: &VaultEntry) -> Result<()>;
    /// Returns `true` iff a row existed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn keys(&self) -> Result<BTreeSet<String>>;
    async fn has(&self, key: &str) -> Result<bool>;
    async fn get_all(&self) -> Result<BTreeMap<String, VaultEntry>>;
    /// Bulk upsert; all-or-nothing on durable backends.
    async fn import_all(&self, entries: &BTreeMap<String, VaultEntry>) -> Result<()>;
    /// Remove every entry. Journal and metadata are kept.
    async fn clear(&self) -> Result<()>;

    /// Insert journal records, ignoring ones already present.
    async fn append_journal(&self, records: &[JournalRecord]) -> Result<()>;
    /// All journal records ordered by `(replica, seq)`.
    async fn load_journal(&self) -> Result<Vec<JournalRecord>>;

    /// Apply upserts, then deletes, then journal appends. Durable backends
    /// commit all of it or none of it.
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()>;

    async fn get_meta(&self, name: &str) -> Result<Option<String>>;
    async fn set_meta(&self, name: &str, value: &str) -> Result<()>;

    /// Release underlying resources. Further calls may fail.
    async fn close(&self);
}
