//! The replicated map itself.

use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use {
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::{
    ReplicaError, Result,
    delta::Delta,
    ids::{OpId, ReplicaId},
    ops::{OpKind, Operation},
    state_vector::StateVector,
};

/// How a key's visible value changed after applying a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Added,
    Updated,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapChange<V> {
    pub key: String,
    pub action: ChangeAction,
    /// New visible value; `None` for removals.
    pub value: Option<V>,
}

/// Outcome of [`ReplicatedMap::apply_update`].
#[derive(Debug, Clone)]
pub struct AppliedUpdate<V> {
    pub origin: Option<String>,
    /// Operations newly added to the log, in integration order.
    pub integrated: Vec<Operation<V>>,
    /// Visible changes, one per affected key, sorted by key.
    pub changes: Vec<MapChange<V>>,
    /// Operations still waiting for a missing predecessor.
    pub pending: usize,
}

impl<V> AppliedUpdate<V> {
    pub fn is_noop(&self) -> bool {
        self.integrated.is_empty()
    }
}

/// Last-writer-wins map replicated through operation deltas.
///
/// Operations live in an append-only arena. `by_replica` indexes the arena
/// per origin (position `i` holds seq `i + 1`) and `winners` points each key at
/// its highest-stamped operation, which may be a tombstone.
pub struct ReplicatedMap<V> {
    replica: ReplicaId,
    arena: Vec<Operation<V>>,
    by_replica: BTreeMap<ReplicaId, Vec<usize>>,
    winners: BTreeMap<String, usize>,
    pending: BTreeMap<OpId, Operation<V>>,
    max_lamport: u64,
}

impl<V: Clone + PartialEq> ReplicatedMap<V> {
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            arena: Vec::new(),
            by_replica: BTreeMap::new(),
            winners: BTreeMap::new(),
            pending: BTreeMap::new(),
            max_lamport: 0,
        }
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.winner(key).and_then(Operation::value)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Visible keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.entries().map(|(k, _)| k.to_string()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &V)> {
        self.winners.iter().filter_map(|(k, &i)| {
            self.arena
                .get(i)
                .and_then(Operation::value)
                .map(|v| (k.as_str(), v))
        })
    }

    /// Number of visible keys.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every integrated operation, tombstones included.
    pub fn operations(&self) -> impl Iterator<Item = &Operation<V>> {
        self.arena.iter()
    }

    pub fn op_count(&self) -> usize {
        self.arena.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn max_lamport(&self) -> u64 {
        self.max_lamport
    }

    pub fn state_vector(&self) -> StateVector {
        self.by_replica
            .iter()
            .map(|(r, idxs)| (r.clone(), idxs.len() as u64))
            .collect()
    }

    /// Write `value` under `key`. Returns the issued operation so the caller
    /// can persist it.
    pub fn set(&mut self, key: impl Into<String>, value: V) -> Operation<V> {
        let key = key.into();
        let kind = if self.has(&key) {
            OpKind::Update(value)
        } else {
            OpKind::Insert(value)
        };
        self.issue(key, kind)
    }

    /// Tombstone `key`. Returns `None` when the key is not visible.
    pub fn remove(&mut self, key: &str) -> Option<Operation<V>> {
        if !self.has(key) {
            return None;
        }
        Some(self.issue(key.to_string(), OpKind::Tombstone))
    }

    fn issue(&mut self, key: String, op: OpKind<V>) -> Operation<V> {
        let op = Operation {
            replica: self.replica.clone(),
            seq: self.count_for(&self.replica) + 1,
            lamport: self.max_lamport + 1,
            key,
            op,
        };
        self.integrate(op.clone());
        op
    }

    fn winner(&self, key: &str) -> Option<&Operation<V>> {
        self.winners.get(key).and_then(|&i| self.arena.get(i))
    }

    fn count_for(&self, replica: &ReplicaId) -> u64 {
        self.by_replica.get(replica).map_or(0, |v| v.len() as u64)
    }

    fn known(&self, id: &OpId) -> Option<&Operation<V>> {
        let pos = usize::try_from(id.seq.checked_sub(1)?).ok()?;
        let idx = *self.by_replica.get(&id.replica)?.get(pos)?;
        self.arena.get(idx)
    }

    fn integrate(&mut self, op: Operation<V>) {
        let idx = self.arena.len();
        self.max_lamport = self.max_lamport.max(op.lamport);
        let wins = self.winner(&op.key).is_none_or(|cur| op.supersedes(cur));
        if wins {
            self.winners.insert(op.key.clone(), idx);
        }
        self.by_replica.entry(op.replica.clone()).or_default().push(idx);
        self.arena.push(op);
    }

    /// Check a batch against everything already held and drop duplicates.
    /// Fails without side effects.
    fn screen(&self, ops: Vec<Operation<V>>, allow_local: bool) -> Result<Vec<Operation<V>>> {
        let mut fresh: BTreeMap<OpId, Operation<V>> = BTreeMap::new();
        for op in ops {
            if op.seq == 0 {
                return Err(ReplicaError::malformed(format!(
                    "operation from {} has seq 0",
                    op.replica
                )));
            }
            if op.lamport == 0 {
                return Err(ReplicaError::malformed(format!(
                    "operation {} has lamport 0",
                    op.id()
                )));
            }
            if op.key.is_empty() {
                return Err(ReplicaError::malformed(format!(
                    "operation {} has an empty key",
                    op.id()
                )));
            }
            let id = op.id();
            if let Some(held) = self
                .known(&id)
                .or_else(|| self.pending.get(&id))
                .or_else(|| fresh.get(&id))
            {
                if *held != op {
                    return Err(ReplicaError::malformed(format!(
                        "operation {id} differs from the copy already held"
                    )));
                }
                continue;
            }
            if !allow_local && op.replica == self.replica {
                return Err(ReplicaError::malformed(format!(
                    "operation {id} was never issued by this replica"
                )));
            }
            fresh.insert(id, op);
        }
        Ok(fresh.into_values().collect())
    }

    fn absorb(&mut self, fresh: Vec<Operation<V>>, origin: Option<&str>) -> AppliedUpdate<V> {
        for op in fresh {
            self.pending.insert(op.id(), op);
        }
        let before: BTreeMap<String, Option<usize>> = self
            .pending
            .values()
            .map(|op| (op.key.clone(), self.winners.get(&op.key).copied()))
            .collect();

        let start = self.arena.len();
        self.drain_pending();
        let integrated = self
            .arena
            .get(start..)
            .map(<[_]>::to_vec)
            .unwrap_or_default();

        let changes = self.diff(before);
        if !integrated.is_empty() || !self.pending.is_empty() {
            debug!(
                replica = %self.replica,
                origin = origin.unwrap_or("local"),
                integrated = integrated.len(),
                changes = changes.len(),
                pending = self.pending.len(),
                "applied delta"
            );
        }

        #[cfg(feature = "metrics")]
        {
            cairn_metrics::counter!(cairn_metrics::replica::OPS_INTEGRATED_TOTAL)
                .increment(integrated.len() as u64);
            cairn_metrics::gauge!(cairn_metrics::replica::PENDING_OPS)
                .set(self.pending.len() as f64);
        }

        AppliedUpdate {
            origin: origin.map(str::to_string),
            integrated,
            changes,
            pending: self.pending.len(),
        }
    }

    /// Move every pending op whose predecessor is now integrated into the log.
    fn drain_pending(&mut self) {
        let mut next: BTreeMap<ReplicaId, u64> = BTreeMap::new();
        let mut ready = Vec::new();
        for id in self.pending.keys() {
            let expected = next
                .entry(id.replica.clone())
                .or_insert_with(|| self.count_for(&id.replica) + 1);
            if id.seq == *expected {
                ready.push(id.clone());
                *expected += 1;
            }
        }
        for id in ready {
            if let Some(op) = self.pending.remove(&id) {
                self.integrate(op);
            }
        }
    }

    fn diff(&self, before: BTreeMap<String, Option<usize>>) -> Vec<MapChange<V>> {
        let value_at = |idx: Option<usize>| {
            idx.and_then(|i| self.arena.get(i))
                .and_then(Operation::value)
        };
        let mut changes = Vec::new();
        for (key, prev) in before {
            let now = self.winners.get(&key).copied();
            if now == prev {
                continue;
            }
            let action = match (value_at(prev), value_at(now)) {
                (None, None) => continue,
                (None, Some(_)) => ChangeAction::Added,
                (Some(_), None) => ChangeAction::Removed,
                (Some(a), Some(b)) if a == b => continue,
                (Some(_), Some(_)) => ChangeAction::Updated,
            };
            changes.push(MapChange {
                key,
                action,
                value: value_at(now).cloned(),
            });
        }
        changes
    }
}

impl<V: Clone + PartialEq> ReplicatedMap<V> {
    /// Borrow the map for a change set that is rolled back unless
    /// [`Staged::commit`] is called. Dropping the guard, including by
    /// cancelling the future that holds it, restores the captured state.
    pub fn stage(&mut self) -> Staged<'_, V> {
        let checkpoint = Checkpoint {
            arena_len: self.arena.len(),
            replica_lens: self
                .by_replica
                .iter()
                .map(|(r, idxs)| (r.clone(), idxs.len()))
                .collect(),
            winners: self.winners.clone(),
            pending: self.pending.clone(),
            max_lamport: self.max_lamport,
        };
        Staged {
            map: self,
            checkpoint: Some(checkpoint),
        }
    }

    /// The arena only grows between checkpoint and rollback, so truncating
    /// each index restores it exactly.
    fn rollback(&mut self, checkpoint: Checkpoint<V>) {
        self.arena.truncate(checkpoint.arena_len);
        self.by_replica
            .retain(|replica, idxs| match checkpoint.replica_lens.get(replica) {
                Some(&len) => {
                    idxs.truncate(len);
                    true
                },
                None => false,
            });
        self.winners = checkpoint.winners;
        self.pending = checkpoint.pending;
        self.max_lamport = checkpoint.max_lamport;

        #[cfg(feature = "metrics")]
        cairn_metrics::gauge!(cairn_metrics::replica::PENDING_OPS).set(self.pending.len() as f64);
    }
}

struct Checkpoint<V> {
    arena_len: usize,
    replica_lens: BTreeMap<ReplicaId, usize>,
    winners: BTreeMap<String, usize>,
    pending: BTreeMap<OpId, Operation<V>>,
    max_lamport: u64,
}

/// Guard returned by [`ReplicatedMap::stage`].
pub struct Staged<'a, V: Clone + PartialEq> {
    map: &'a mut ReplicatedMap<V>,
    checkpoint: Option<Checkpoint<V>>,
}

impl<V: Clone + PartialEq> Staged<'_, V> {
    /// Keep every change made through the guard.
    pub fn commit(mut self) {
        self.checkpoint = None;
    }
}

impl<V: Clone + PartialEq> Deref for Staged<'_, V> {
    type Target = ReplicatedMap<V>;

    fn deref(&self) -> &ReplicatedMap<V> {
        self.map
    }
}

impl<V: Clone + PartialEq> DerefMut for Staged<'_, V> {
    fn deref_mut(&mut self) -> &mut ReplicatedMap<V> {
        self.map
    }
}

impl<V: Clone + PartialEq> Drop for Staged<'_, V> {
    fn drop(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            let discarded = self.map.arena.len().saturating_sub(checkpoint.arena_len);
            self.map.rollback(checkpoint);
            debug!(replica = %self.map.replica, discarded, "rolled back staged changes");
        }
    }
}

impl<V> ReplicatedMap<V>
where
    V: Serialize + DeserializeOwned + Clone + PartialEq,
{
    /// Rebuild a map from its persisted operation log.
    pub fn from_journal(
        replica: ReplicaId,
        ops: impl IntoIterator<Item = Operation<V>>,
    ) -> Result<Self> {
        let mut map = Self::new(replica);
        let fresh = map
            .screen(ops.into_iter().collect(), true)
            .map_err(|e| ReplicaError::corrupt_journal(e.to_string()))?;
        map.absorb(fresh, None);
        if !map.pending.is_empty() {
            warn!(
                replica = %map.replica,
                pending = map.pending.len(),
                "journal has gaps; some operations stay pending"
            );
        }
        Ok(map)
    }

    /// Encode every integrated operation not covered by `remote`.
    pub fn updates_since(&self, remote: &StateVector) -> Result<Delta> {
        let mut ops = Vec::new();
        for (replica, idxs) in &self.by_replica {
            let known = usize::try_from(remote.get(replica)).unwrap_or(usize::MAX);
            ops.extend(idxs.iter().skip(known).filter_map(|&i| self.arena.get(i)));
        }
        Delta::encode(&ops)
    }

    /// Merge a delta from a peer. Idempotent and commutative; a malformed
    /// delta is rejected as a whole and leaves the map untouched.
    pub fn apply_update(
        &mut self,
        delta: &Delta,
        origin: Option<&str>,
    ) -> Result<AppliedUpdate<V>> {
        let fresh = delta
            .decode::<V>()
            .and_then(|ops| self.screen(ops, false))
            .inspect_err(|e| {
                warn!(replica = %self.replica, origin, error = %e, "rejected delta");
                #[cfg(feature = "metrics")]
                cairn_metrics::counter!(cairn_metrics::replica::MALFORMED_DELTAS_TOTAL)
                    .increment(1);
            })?;
        Ok(self.absorb(fresh, origin))
    }
}
