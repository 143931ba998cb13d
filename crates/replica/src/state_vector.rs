//! Compact summary of which operations a replica holds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ReplicaError, Result, ids::ReplicaId};

/// For every replica, how many of its operations (contiguous from seq 1) are
/// integrated. Replicas absent from the vector count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateVector(BTreeMap<ReplicaId, u64>);

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, replica: &ReplicaId) -> u64 {
        self.0.get(replica).copied().unwrap_or(0)
    }

    pub fn set(&mut self, replica: ReplicaId, count: u64) {
        if count == 0 {
            self.0.remove(&replica);
        } else {
            self.0.insert(replica, count);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, u64)> {
        self.0.iter().map(|(r, n)| (r, *n))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of operations covered.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// True when `self` has seen everything `other` has.
    pub fn dominates(&self, other: &Self) -> bool {
        other.iter().all(|(r, n)| self.get(r) >= n)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ReplicaError::malformed(format!("state vector: {e}")))
    }
}

impl FromIterator<(ReplicaId, u64)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (ReplicaId, u64)>>(iter: I) -> Self {
        let mut sv = Self::new();
        for (r, n) in iter {
            sv.set(r, n);
        }
        sv
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_replica_counts_as_zero() {
        let sv = StateVector::new();
        assert_eq!(sv.get(&"x".into()), 0);
        assert!(sv.is_empty());
    }

    #[test]
    fn dominance() {
        let a: StateVector = [("a".into(), 3), ("b".into(), 1)].into_iter().collect();
        let b: StateVector = [("a".into(), 2)].into_iter().collect();
        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        assert!(a.dominates(&StateVector::new()));
        assert_eq!(a.total(), 4);
    }

    #[test]
    fn bytes_are_json_object() {
        let sv: StateVector = [("dev".into(), 2)].into_iter().collect();
        let bytes = sv.to_bytes().unwrap();
        assert_eq!(bytes, br#"{"dev":2}"#);
        assert_eq!(StateVector::from_bytes(&bytes).unwrap(), sv);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            StateVector::from_bytes(b"nope"),
            Err(ReplicaError::MalformedDelta { .. })
        ));
    }
}
