//! SQLite-backed store using sqlx.
//!
//! Every row carries the namespace in its primary key, so any number of vaults
//! can share one database file and one pool.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    time::Duration,
};

use {
    async_trait::async_trait,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    },
    tracing::{debug, info},
};

use crate::{
    Error, Result,
    entry::{JournalRecord, VaultEntry, WriteBatch, format_timestamp, parse_timestamp},
    store::EntryStore,
};

/// Open (creating if needed) a WAL-mode SQLite database and run migrations.
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Sqlx(sqlx::Error::Io(e)))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    crate::run_migrations(&pool).await?;
    info!(path = %path.display(), "opened vault database");
    Ok(pool)
}

/// Namespaces holding entries or metadata in the database behind `pool`.
pub async fn list_namespaces(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar(
        "SELECT namespace FROM vault_meta
         UNION
         SELECT namespace FROM vault_entries
         ORDER BY namespace",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    key: String,
    ciphertext: Vec<u8>,
    iv: Vec<u8>,
    auth_tag: Vec<u8>,
    salt: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct JournalRow {
    replica: String,
    seq: i64,
    body: String,
}

/// SQLite persistence for one vault namespace.
pub struct SqliteStore {
    pool: SqlitePool,
    namespace: String,
    owns_pool: bool,
}

impl SqliteStore {
    /// Open a dedicated pool on `path` for `namespace`.
    pub async fn open(path: &Path, namespace: impl Into<String>) -> Result<Self> {
        let pool = open_pool(path).await?;
        Ok(Self {
            owns_pool: true,
            ..Self::with_pool(pool, namespace)
        })
    }

    /// Use an existing pool (migrations must already be run). The pool stays
    /// open when this store is closed.
    pub fn with_pool(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            owns_pool: false,
        }
    }

    fn to_entry(&self, row: EntryRow) -> Result<VaultEntry> {
        let created_at = parse_timestamp(&row.created_at).ok_or_else(|| {
            Error::invalid_record(&self.namespace, format!("bad created_at for {}", row.key))
        })?;
        let updated_at = parse_timestamp(&row.updated_at).ok_or_else(|| {
            Error::invalid_record(&self.namespace, format!("bad updated_at for {}", row.key))
        })?;
        let version = u64::try_from(row.version).map_err(|_| {
            Error::invalid_record(&self.namespace, format!("bad version for {}", row.key))
        })?;
        Ok(VaultEntry {
            key: row.key,
            ciphertext: row.ciphertext,
            iv: row.iv,
            auth_tag: row.auth_tag,
            salt: row.salt,
            created_at,
            updated_at,
            version,
        })
    }
}

const UPSERT_ENTRY: &str = "INSERT INTO vault_entries
        (namespace, key, ciphertext, iv, auth_tag, salt, created_at, updated_at, version)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(namespace, key) DO UPDATE SET
        ciphertext = excluded.ciphertext,
        iv         = excluded.iv,
        auth_tag   = excluded.auth_tag,
        salt       = excluded.salt,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at,
        version    = excluded.version";

fn upsert_query<'q>(
    namespace: &'q str,
    key: &'q str,
    entry: &'q VaultEntry,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(UPSERT_ENTRY)
        .bind(namespace)
        .bind(key)
        .bind(&entry.ciphertext)
        .bind(&entry.iv)
        .bind(&entry.auth_tag)
        .bind(&entry.salt)
        .bind(format_timestamp(&entry.created_at))
        .bind(format_timestamp(&entry.updated_at))
        .bind(entry.version as i64)
}

fn journal_insert<'q>(
    namespace: &'q str,
    record: &'q JournalRecord,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(
        "INSERT OR IGNORE INTO replica_journal (namespace, replica, seq, body)
         VALUES (?, ?, ?, ?)",
    )
    .bind(namespace)
    .bind(&record.replica)
    .bind(record.seq as i64)
    .bind(&record.body)
}

#[async_trait]
impl EntryStore for SqliteStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<VaultEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(
            "SELECT key, ciphertext, iv, auth_tag, salt, created_at, updated_at, version
             FROM vault_entries WHERE namespace = ? AND key = ?",
        )
        .bind(&self.namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| self.to_entry(r)).transpose()
    }

    async fn put(&self, key: &str, entry: &VaultEntry) -> Result<()> {
        upsert_query(&self.namespace, key, entry)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vault_entries WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> Result<BTreeSet<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM vault_entries WHERE namespace = ? ORDER BY key",
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys.into_iter().collect())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM vault_entries WHERE namespace = ? AND key = ?",
        )
        .bind(&self.namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, VaultEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT key, ciphertext, iv, auth_tag, salt, created_at, updated_at, version
             FROM vault_entries WHERE namespace = ?",
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut all = BTreeMap::new();
        for row in rows {
            let entry = self.to_entry(row)?;
            all.insert(entry.key.clone(), entry);
        }
        Ok(all)
    }

    async fn import_all(&self, entries: &BTreeMap<String, VaultEntry>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, entry) in entries {
            upsert_query(&self.namespace, key, entry)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(namespace = %self.namespace, count = entries.len(), "imported entries");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM vault_entries WHERE namespace = ?")
            .bind(&self.namespace)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_journal(&self, records: &[JournalRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            journal_insert(&self.namespace, r).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_journal(&self) -> Result<Vec<JournalRecord>> {
        let rows = sqlx::query_as::<_, JournalRow>(
            "SELECT replica, seq, body FROM replica_journal
             WHERE namespace = ? ORDER BY replica, seq",
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let seq = u64::try_from(r.seq).map_err(|_| {
                    Error::invalid_record(&self.namespace, format!("bad journal seq {}", r.seq))
                })?;
                Ok(JournalRecord {
                    replica: r.replica,
                    seq,
                    body: r.body,
                })
            })
            .collect()
    }

    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, entry) in &batch.upserts {
            upsert_query(&self.namespace, key, entry)
                .execute(&mut *tx)
                .await?;
        }
        for key in &batch.deletes {
            sqlx::query("DELETE FROM vault_entries WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        for r in &batch.journal {
            journal_insert(&self.namespace, r).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(
            namespace = %self.namespace,
            upserts = batch.upserts.len(),
            deletes = batch.deletes.len(),
            journal = batch.journal.len(),
            "wrote batch"
        );
        Ok(())
    }

    async fn get_meta(&self, name: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM vault_meta WHERE namespace = ? AND name = ?",
        )
        .bind(&self.namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_meta(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO vault_meta (namespace, name, value) VALUES (?, ?, ?)
             ON CONFLICT(namespace, name) DO UPDATE SET value = excluded.value",
        )
        .bind(&self.namespace)
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        if self.owns_pool {
            self.pool.close().await;
        }
        debug!(namespace = %self.namespace, owns_pool = self.owns_pool, "closed sqlite store");
    }
}
