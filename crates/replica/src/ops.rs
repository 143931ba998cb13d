//! Operation log entries.

use serde::{Deserialize, Serialize};

use crate::ids::{OpId, ReplicaId};

/// What an operation does to its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OpKind<V> {
    /// First write of a key the issuing replica did not see.
    Insert(V),
    /// Overwrite of a key the issuing replica saw.
    Update(V),
    /// Deletion marker. Kept forever so it can outrank older concurrent writes.
    Tombstone,
}

/// One immutable entry of the operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation<V> {
    pub replica: ReplicaId,
    /// 1-based position in the issuing replica's own sequence.
    pub seq: u64,
    /// Lamport timestamp: greater than every timestamp the issuer had seen.
    pub lamport: u64,
    pub key: String,
    pub op: OpKind<V>,
}

impl<V> Operation<V> {
    pub fn id(&self) -> OpId {
        OpId {
            replica: self.replica.clone(),
            seq: self.seq,
        }
    }

    /// `(lamport, replica)` total order used to pick the winner for a key.
    pub fn stamp(&self) -> (u64, &ReplicaId) {
        (self.lamport, &self.replica)
    }

    /// The written value, `None` for tombstones.
    pub fn value(&self) -> Option<&V> {
        match &self.op {
            OpKind::Insert(v) | OpKind::Update(v) => Some(v),
            OpKind::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.op, OpKind::Tombstone)
    }

    /// Whether `self` beats `other` for the same key.
    pub fn supersedes(&self, other: &Self) -> bool {
        self.stamp() > other.stamp()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn op(replica: &str, lamport: u64, kind: OpKind<i32>) -> Operation<i32> {
        Operation {
            replica: replica.into(),
            seq: 1,
            lamport,
            key: "k".into(),
            op: kind,
        }
    }

    #[test]
    fn higher_lamport_wins() {
        let a = op("z", 1, OpKind::Insert(1));
        let b = op("a", 2, OpKind::Insert(2));
        assert!(b.supersedes(&a));
        assert!(!a.supersedes(&b));
    }

    #[test]
    fn tie_broken_by_replica_id() {
        let a = op("alpha", 5, OpKind::Insert(1));
        let b = op("beta", 5, OpKind::Tombstone);
        assert!(b.supersedes(&a));
    }

    #[test]
    fn tombstone_has_no_value() {
        assert_eq!(op("a", 1, OpKind::Tombstone).value(), None);
        assert_eq!(op("a", 1, OpKind::Update(3)).value(), Some(&3));
    }

    #[test]
    fn wire_shape() {
        let json = serde_json::to_value(op("r", 4, OpKind::Insert(9))).unwrap();
        assert_eq!(json["op"]["kind"], "insert");
        assert_eq!(json["op"]["value"], 9);
        assert_eq!(json["replica"], "r");

        let tomb = serde_json::to_value(op("r", 4, OpKind::Tombstone)).unwrap();
        assert_eq!(tomb["op"]["kind"], "tombstone");
    }
}
