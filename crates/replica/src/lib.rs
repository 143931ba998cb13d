//! Delta-based replicated map (a last-writer-wins CRDT).
//!
//! Every mutation is an [`Operation`] appended to an operation log and tagged
//! with its origin replica, a per-replica sequence number and a Lamport
//! timestamp. The visible map is a projection: per key, the operation with the
//! highest `(lamport, replica)` stamp wins, tombstones included.
//!
//! Replicas synchronize by exchanging a [`StateVector`] (how many operations of
//! each replica they hold) and answering with a [`Delta`] of whatever the other
//! side is missing. Applying deltas is idempotent and order-independent.

pub mod delta;
pub mod error;
pub mod ids;
pub mod map;
pub mod ops;
pub mod state_vector;

pub use {
    delta::{DELTA_FORMAT_VERSION, Delta},
    error::{ReplicaError, Result},
    ids::{OpId, ReplicaId},
    map::{AppliedUpdate, ChangeAction, MapChange, ReplicatedMap, Staged},
    ops::{OpKind, Operation},
    state_vector::StateVector,
};
