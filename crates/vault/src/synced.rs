//! Encrypted vault whose entries replicate through a [`ReplicatedMap`].
//!
//! Every change is staged in the map first. The entry writes and the journal
//! records it produces then go to storage as one batch, and the map change is
//! kept only once that batch is durable. Remote deltas reach storage as raw
//! ciphertext.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Weak},
    time::Duration,
};

use {
    cairn_replica::{
        AppliedUpdate, ChangeAction, Delta, OpKind, Operation, ReplicaId, ReplicatedMap,
        StateVector,
    },
    cairn_storage::{EntryStore, JournalRecord, VaultEntry, WriteBatch},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tokio::{
        sync::{Mutex, Notify, RwLock, broadcast},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    error::{Result, VaultError},
    events::{KeyChange, SyncEvent},
    peer::PeerExchange,
    vault::{EncryptedVault, Item},
};

const META_REPLICA_ID: &str = "replica_id";
const EVENT_CAPACITY: usize = 256;

/// When a synced vault talks to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Only on explicit [`SyncedVault::sync_now`] / [`SyncedVault::sync_round`].
    #[default]
    Manual,
    /// Every `interval`, in a background task.
    Periodic { interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    /// The last round reached at least one peer.
    Connected,
}

/// Outcome of one round over all registered peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub peers_reached: usize,
    pub peers_failed: usize,
    pub integrated: usize,
}

pub struct SyncedVault {
    vault: EncryptedVault,
    replica: ReplicaId,
    map: Mutex<ReplicatedMap<VaultEntry>>,
    status: RwLock<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    peers: RwLock<Vec<Arc<dyn PeerExchange>>>,
    running: RwLock<bool>,
    wake_notify: Arc<Notify>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

fn journal_records(ops: &[Operation<VaultEntry>]) -> Result<Vec<JournalRecord>> {
    ops.iter()
        .map(|op| {
            Ok(JournalRecord {
                replica: op.replica.to_string(),
                seq: op.seq,
                body: serde_json::to_string(op)?,
            })
        })
        .collect()
}

fn key_changes(changes: impl IntoIterator<Item = (String, ChangeAction)>) -> Vec<KeyChange> {
    changes
        .into_iter()
        .map(|(key, action)| KeyChange { key, action })
        .collect()
}

impl SyncedVault {
    /// Attach replication to an initialized vault.
    ///
    /// Loads (or assigns) the local replica id, replays the journal and
    /// reconciles the map with what storage holds.
    pub async fn open(vault: EncryptedVault) -> Result<Arc<Self>> {
        let stored = vault.export().await?;
        let storage = vault.storage();

        let replica = match storage.get_meta(META_REPLICA_ID).await? {
            Some(id) => ReplicaId::new(id),
            None => {
                let id = ReplicaId::generate();
                storage.set_meta(META_REPLICA_ID, id.as_str()).await?;
                id
            },
        };

        let ops = storage
            .load_journal()
            .await?
            .into_iter()
            .map(|rec| {
                serde_json::from_str::<Operation<VaultEntry>>(&rec.body).map_err(|e| {
                    VaultError::CorruptJournal {
                        reason: format!("{}#{}: {e}", rec.replica, rec.seq),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut map = ReplicatedMap::from_journal(replica.clone(), ops)?;

        // Writes that reached storage but not the journal become local ops.
        let mut registered = Vec::new();
        for (key, entry) in &stored {
            if map.get(key) != Some(entry) {
                registered.push(map.set(key.clone(), entry.clone()));
            }
        }
        storage.append_journal(&journal_records(&registered)?).await?;

        // Entries the map shows but storage lost are restored verbatim.
        let missing: BTreeMap<String, VaultEntry> = map
            .entries()
            .filter(|(k, _)| !stored.contains_key(*k))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if !missing.is_empty() {
            vault.import(&missing).await?;
        }

        info!(
            vault = %vault.name(),
            replica = %replica,
            ops = map.op_count(),
            registered = registered.len(),
            restored = missing.len(),
            "synced vault opened"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Arc::new(Self {
            vault,
            replica,
            map: Mutex::new(map),
            status: RwLock::new(SyncStatus::Idle),
            events,
            peers: RwLock::new(Vec::new()),
            running: RwLock::new(false),
            wake_notify: Arc::new(Notify::new()),
            timer_handle: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        self.vault.name()
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    /// The underlying encrypted vault. Writing through it bypasses
    /// replication until the next reopen.
    pub fn vault(&self) -> &EncryptedVault {
        &self.vault
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> SyncStatus {
        *self.status.read().await
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ── Entry operations ────────────────────────────────────────────────────

    pub async fn put<T: Serialize>(&self, key: &str, value: T) -> Result<Item<T>> {
        let mut map = self.map.lock().await;
        let entry = self.vault.seal(key, &value).await?;
        let mut staged = map.stage();
        let op = staged.set(key, entry.clone());
        let batch = WriteBatch {
            upserts: BTreeMap::from([(key.to_string(), entry.clone())]),
            journal: journal_records(std::slice::from_ref(&op))?,
            ..WriteBatch::default()
        };
        self.vault.write_batch(&batch).await?;
        staged.commit();
        drop(map);
        self.vault.record_put(&entry);

        let action = match op.op {
            OpKind::Insert(_) => ChangeAction::Added,
            _ => ChangeAction::Updated,
        };
        self.emit(SyncEvent::Update {
            vault: self.name().to_string(),
            origin: None,
            changes: key_changes([(key.to_string(), action)]),
        });
        Ok(Item::from_entry(entry, value))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.vault.get(key).await
    }

    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Item<T>>> {
        self.vault.get_item(key).await
    }

    /// Delete `key` and replicate a tombstone for it.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.lock().await;
        let existed = self.vault.has(key).await?;
        let mut staged = map.stage();
        let tombstone = staged.remove(key);
        let batch = WriteBatch {
            deletes: BTreeSet::from([key.to_string()]),
            journal: journal_records(tombstone.as_slice())?,
            ..WriteBatch::default()
        };
        self.vault.write_batch(&batch).await?;
        staged.commit();
        drop(map);

        if tombstone.is_some() {
            self.emit(SyncEvent::Update {
                vault: self.name().to_string(),
                origin: None,
                changes: key_changes([(key.to_string(), ChangeAction::Removed)]),
            });
        }
        Ok(existed)
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.vault.keys().await
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        self.vault.has(key).await
    }

    pub async fn entry(&self, key: &str) -> Result<Option<VaultEntry>> {
        self.vault.entry(key).await
    }

    pub async fn export(&self) -> Result<BTreeMap<String, VaultEntry>> {
        self.vault.export().await
    }

    /// Delete every entry, replicating a tombstone per key.
    pub async fn clear(&self) -> Result<()> {
        let mut map = self.map.lock().await;
        let stored = self.vault.keys().await?;
        let mut staged = map.stage();
        let keys = staged.keys();
        let tombstones: Vec<_> = keys.iter().filter_map(|k| staged.remove(k)).collect();
        let batch = WriteBatch {
            deletes: stored.into_iter().chain(keys.iter().cloned()).collect(),
            journal: journal_records(&tombstones)?,
            ..WriteBatch::default()
        };
        self.vault.write_batch(&batch).await?;
        staged.commit();
        drop(map);
        info!(vault = %self.name(), removed = batch.deletes.len(), "vault cleared");

        if !tombstones.is_empty() {
            self.emit(SyncEvent::Update {
                vault: self.name().to_string(),
                origin: None,
                changes: key_changes(keys.into_iter().map(|k| (k, ChangeAction::Removed))),
            });
        }
        Ok(())
    }

    // ── Replication ─────────────────────────────────────────────────────────

    pub async fn state_vector(&self) -> StateVector {
        self.map.lock().await.state_vector()
    }

    pub async fn updates_since(&self, remote: &StateVector) -> Result<Delta> {
        Ok(self.map.lock().await.updates_since(remote)?)
    }

    /// Number of remote operations waiting for a missing predecessor.
    pub async fn pending_ops(&self) -> usize {
        self.map.lock().await.pending_len()
    }

    /// Merge a delta from a peer and persist the visible changes.
    ///
    /// Entries are imported as received: no decryption, no version bump. If
    /// the storage write fails the map is left as it was, so the same delta
    /// can be applied again.
    pub async fn apply_update(
        &self,
        delta: &Delta,
        origin: Option<&str>,
    ) -> Result<AppliedUpdate<VaultEntry>> {
        let mut map = self.map.lock().await;
        let mut staged = map.stage();
        let applied = match staged.apply_update(delta, origin) {
            Ok(applied) => applied,
            Err(e) => {
                let err = VaultError::from(e);
                self.emit(SyncEvent::SyncError {
                    vault: self.name().to_string(),
                    peer: origin.map(str::to_string),
                    message: err.to_string(),
                });
                return Err(err);
            },
        };
        if applied.is_noop() {
            staged.commit();
            return Ok(applied);
        }

        let mut batch = WriteBatch {
            journal: journal_records(&applied.integrated)?,
            ..WriteBatch::default()
        };
        for change in &applied.changes {
            match (&change.action, &change.value) {
                (ChangeAction::Removed, _) | (_, None) => {
                    batch.deletes.insert(change.key.clone());
                },
                (_, Some(entry)) => {
                    batch.upserts.insert(change.key.clone(), entry.clone());
                },
            }
        }
        if let Err(e) = self.vault.write_batch(&batch).await {
            warn!(
                vault = %self.name(),
                origin = origin.unwrap_or("unknown"),
                error = %e,
                "remote update not persisted; map rolled back"
            );
            return Err(e);
        }
        staged.commit();
        drop(map);

        debug!(
            vault = %self.name(),
            origin = origin.unwrap_or("unknown"),
            integrated = applied.integrated.len(),
            changes = applied.changes.len(),
            "remote update applied"
        );
        if !applied.changes.is_empty() {
            self.emit(SyncEvent::Update {
                vault: self.name().to_string(),
                origin: origin.map(str::to_string),
                changes: key_changes(
                    applied
                        .changes
                        .iter()
                        .map(|c| (c.key.clone(), c.action)),
                ),
            });
        }
        Ok(applied)
    }

    // ── Peers ───────────────────────────────────────────────────────────────

    pub async fn add_peer(&self, peer: Arc<dyn PeerExchange>) {
        let id = peer.peer_id().to_string();
        let mut peers = self.peers.write().await;
        peers.retain(|p| p.peer_id() != id);
        peers.push(peer);
        drop(peers);
        info!(vault = %self.name(), peer = %id, "peer connected");
        self.emit(SyncEvent::Connected {
            vault: self.name().to_string(),
            peer: id,
        });
    }

    pub async fn remove_peer(&self, peer_id: &str) -> bool {
        let mut peers = self.peers.write().await;
        let before = peers.len();
        peers.retain(|p| p.peer_id() != peer_id);
        let removed = peers.len() != before;
        let none_left = peers.is_empty();
        drop(peers);

        if removed {
            info!(vault = %self.name(), peer = %peer_id, "peer disconnected");
            self.emit(SyncEvent::Disconnected {
                vault: self.name().to_string(),
                peer: peer_id.to_string(),
            });
            if none_left {
                *self.status.write().await = SyncStatus::Idle;
            }
        }
        removed
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        self.peers
            .read()
            .await
            .iter()
            .map(|p| p.peer_id().to_string())
            .collect()
    }

    /// Exchange with one peer. Returns the number of operations integrated.
    pub async fn sync_with(&self, peer: &dyn PeerExchange) -> Result<usize> {
        let remote = peer.state_vector().await?;
        let local = self.state_vector().await;
        if !remote.dominates(&local) {
            let outgoing = self.updates_since(&remote).await?;
            peer.push(&outgoing, self.replica.as_str()).await?;
        }
        if local.dominates(&remote) {
            return Ok(0);
        }
        let incoming = peer.pull(&local).await?;
        let applied = self.apply_update(&incoming, Some(peer.peer_id())).await?;
        Ok(applied.integrated.len())
    }

    /// One sync round over every registered peer. Peer failures are reported
    /// as events and do not abort the round.
    pub async fn sync_round(&self) -> SyncReport {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();
        *self.status.write().await = SyncStatus::Syncing;
        self.emit(SyncEvent::SyncStart {
            vault: self.name().to_string(),
        });

        let peers = self.peers.read().await.clone();
        let mut report = SyncReport::default();
        for peer in &peers {
            match self.sync_with(peer.as_ref()).await {
                Ok(n) => {
                    report.peers_reached += 1;
                    report.integrated += n;
                },
                Err(e) => {
                    report.peers_failed += 1;
                    warn!(vault = %self.name(), peer = peer.peer_id(), error = %e, "sync with peer failed");
                    self.emit(SyncEvent::SyncError {
                        vault: self.name().to_string(),
                        peer: Some(peer.peer_id().to_string()),
                        message: e.to_string(),
                    });
                },
            }
        }

        *self.status.write().await = if report.peers_reached > 0 {
            SyncStatus::Connected
        } else {
            SyncStatus::Idle
        };
        self.emit(SyncEvent::SyncComplete {
            vault: self.name().to_string(),
            integrated: report.integrated,
        });

        #[cfg(feature = "metrics")]
        {
            cairn_metrics::counter!(cairn_metrics::sync::ROUNDS_TOTAL).increment(1);
            cairn_metrics::counter!(cairn_metrics::sync::PEER_FAILURES_TOTAL)
                .increment(report.peers_failed as u64);
            cairn_metrics::histogram!(cairn_metrics::sync::ROUND_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }
        debug!(vault = %self.name(), ?report, "sync round finished");
        report
    }

    /// Run a round with the registered peers, if any, then return the full
    /// state as a delta for out-of-band delivery. The round's status changes
    /// and events happen even with no peers.
    pub async fn sync_now(&self) -> Result<Delta> {
        self.sync_round().await;
        self.updates_since(&StateVector::new()).await
    }

    // ── Background sync ─────────────────────────────────────────────────────

    /// Start syncing in `mode`. Periodic mode spawns a timer task that holds
    /// only a weak reference, so dropping the vault ends it.
    pub async fn start_sync(self: &Arc<Self>, mode: SyncMode) {
        self.stop_sync().await;
        *self.running.write().await = true;

        let SyncMode::Periodic { interval } = mode else {
            info!(vault = %self.name(), "manual sync enabled");
            return;
        };

        let weak = Arc::downgrade(self);
        let notify = Arc::clone(&self.wake_notify);
        let handle = tokio::spawn(async move {
            Self::timer_loop(weak, notify, interval).await;
        });
        *self.timer_handle.lock().await = Some(handle);
        info!(vault = %self.name(), interval_ms = interval.as_millis() as u64, "periodic sync started");
    }

    async fn timer_loop(weak: Weak<Self>, notify: Arc<Notify>, interval: Duration) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {},
                () = notify.notified() => {
                    debug!("sync loop woken by notify");
                },
            }
            let Some(this) = weak.upgrade() else {
                break;
            };
            if !*this.running.read().await {
                break;
            }
            this.sync_round().await;
        }
    }

    pub async fn stop_sync(&self) {
        let was_running = std::mem::replace(&mut *self.running.write().await, false);
        self.wake_notify.notify_one();
        if let Some(h) = self.timer_handle.lock().await.take() {
            h.abort();
        }
        *self.status.write().await = SyncStatus::Idle;
        if was_running {
            info!(vault = %self.name(), "sync stopped");
        }
    }

    pub async fn is_syncing(&self) -> bool {
        *self.running.read().await
    }

    /// Stop syncing, zero the key and close storage.
    pub async fn destroy(&self) -> Result<()> {
        self.stop_sync().await;
        self.peers.write().await.clear();
        self.vault.destroy().await
    }
}
