//! Key → encrypted-entry persistence shared by the vault and replication layers.
//!
//! Two backends: an in-memory map and a SQLite database in WAL mode. Both are
//! namespaced by vault name and also hold the replication journal and a few
//! metadata values per namespace. [`StorageBackend`] picks one at construction.

pub mod backend;
pub mod entry;
pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;

pub use {
    backend::StorageBackend,
    entry::{JournalRecord, VaultEntry, WriteBatch},
    error::{Error, Result},
    store::EntryStore,
    store_memory::MemoryStore,
    store_sqlite::{SqliteStore, list_namespaces, open_pool},
};

/// Run database migrations for the storage crate.
///
/// Creates the `vault_entries`, `replica_journal` and `vault_meta` tables.
/// [`store_sqlite::open_pool`] calls this; call it yourself when handing an
/// externally created pool to [`SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
