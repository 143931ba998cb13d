//! In-memory store. Nothing survives the process.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    Result,
    entry::{JournalRecord, VaultEntry, WriteBatch},
    store::EntryStore,
};

#[derive(Default)]
struct State {
    entries: BTreeMap<String, VaultEntry>,
    journal: BTreeMap<(String, u64), String>,
    meta: BTreeMap<String, String>,
}

/// In-memory store backed by `BTreeMap`s behind one mutex.
pub struct MemoryStore {
    namespace: String,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<VaultEntry>> {
        Ok(self.with_state(|s| s.entries.get(key).cloned()))
    }

    async fn put(&self, key: &str, entry: &VaultEntry) -> Result<()> {
        let mut entry = entry.clone();
        entry.key = key.to_string();
        self.with_state(|s| s.entries.insert(key.to_string(), entry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.with_state(|s| s.entries.remove(key).is_some()))
    }

    async fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.with_state(|s| s.entries.keys().cloned().collect()))
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.with_state(|s| s.entries.contains_key(key)))
    }

    async fn get_all(&self) -> Result<BTreeMap<String, VaultEntry>> {
        Ok(self.with_state(|s| s.entries.clone()))
    }

    async fn import_all(&self, entries: &BTreeMap<String, VaultEntry>) -> Result<()> {
        self.with_state(|s| {
            for (key, entry) in entries {
                let mut entry = entry.clone();
                entry.key = key.clone();
                s.entries.insert(key.clone(), entry);
            }
        });
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.with_state(|s| s.entries.clear());
        Ok(())
    }

    async fn append_journal(&self, records: &[JournalRecord]) -> Result<()> {
        self.with_state(|s| {
            for r in records {
                s.journal
                    .entry((r.replica.clone(), r.seq))
                    .or_insert_with(|| r.body.clone());
            }
        });
        Ok(())
    }

    async fn load_journal(&self) -> Result<Vec<JournalRecord>> {
        Ok(self.with_state(|s| {
            s.journal
                .iter()
                .map(|((replica, seq), body)| JournalRecord {
                    replica: replica.clone(),
                    seq: *seq,
                    body: body.clone(),
                })
                .collect()
        }))
    }

    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        self.with_state(|s| {
            for (key, entry) in &batch.upserts {
                let mut entry = entry.clone();
                entry.key = key.clone();
                s.entries.insert(key.clone(), entry);
            }
            for key in &batch.deletes {
                s.entries.remove(key);
            }
            for r in &batch.journal {
                s.journal
                    .entry((r.replica.clone(), r.seq))
                    .or_insert_with(|| r.body.clone());
            }
        });
        Ok(())
    }

    async fn get_meta(&self, name: &str) -> Result<Option<String>> {
        Ok(self.with_state(|s| s.meta.get(name).cloned()))
    }

    async fn set_meta(&self, name: &str, value: &str) -> Result<()> {
        self.with_state(|s| s.meta.insert(name.to_string(), value.to_string()));
        Ok(())
    }

    async fn close(&self) {}
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::Utc};

    fn entry(key: &str, version: u64) -> VaultEntry {
        let now = Utc::now();
        VaultEntry {
            key: key.into(),
            ciphertext: vec![version as u8; 4],
            iv: vec![0; 12],
            auth_tag: vec![0; 16],
            salt: None,
            created_at: now,
            updated_at: now,
            version,
        }
    }

    #[tokio::test]
    async fn put_get_overwrite() {
        let store = MemoryStore::new("v");
        store.put("a", &entry("a", 1)).await.unwrap();
        store.put("a", &entry("a", 2)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().version, 2);
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_normalizes_key() {
        let store = MemoryStore::new("v");
        store.put("a", &entry("other", 1)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().key, "a");
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = MemoryStore::new("v");
        store.put("a", &entry("a", 1)).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(!store.has("a").await.unwrap());
    }

    #[tokio::test]
    async fn import_and_export() {
        let store = MemoryStore::new("v");
        store.put("x", &entry("x", 3)).await.unwrap();
        let mut batch = BTreeMap::new();
        batch.insert("a".to_string(), entry("a", 1));
        batch.insert("b".to_string(), entry("b", 1));
        store.import_all(&batch).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(
            store.keys().await.unwrap().into_iter().collect::<Vec<_>>(),
            vec!["a", "b", "x"]
        );

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn journal_ignores_duplicates() {
        let store = MemoryStore::new("v");
        let rec = |replica: &str, seq, body: &str| JournalRecord {
            replica: replica.into(),
            seq,
            body: body.into(),
        };
        store
            .append_journal(&[rec("b", 1, "x"), rec("a", 2, "y"), rec("a", 1, "z")])
            .await
            .unwrap();
        store.append_journal(&[rec("a", 1, "changed")]).await.unwrap();

        let journal = store.load_journal().await.unwrap();
        assert_eq!(journal, vec![rec("a", 1, "z"), rec("a", 2, "y"), rec("b", 1, "x")]);
    }

    #[tokio::test]
    async fn write_batch_applies_every_part() {
        let store = MemoryStore::new("v");
        store.put("gone", &entry("gone", 1)).await.unwrap();

        let mut batch = WriteBatch::default();
        batch.upserts.insert("a".into(), entry("wrong", 2));
        batch.deletes.insert("gone".into());
        batch.journal.push(JournalRecord {
            replica: "r".into(),
            seq: 1,
            body: "{}".into(),
        });
        store.write_batch(&batch).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().unwrap().key, "a");
        assert!(!store.has("gone").await.unwrap());
        assert_eq!(store.load_journal().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_keeps_meta() {
        let store = MemoryStore::new("v");
        store.set_meta("replica_id", "r1").await.unwrap();
        store.put("a", &entry("a", 1)).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(
            store.get_meta("replica_id").await.unwrap().as_deref(),
            Some("r1")
        );
    }
}
