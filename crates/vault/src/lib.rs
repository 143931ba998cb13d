//! Encrypted, replicated key-value vaults.
//!
//! An [`EncryptedVault`] serializes and encrypts values before they reach
//! storage. A [`SyncedVault`] additionally records every write in a replicated
//! map so devices converge by exchanging deltas through [`PeerExchange`]
//! implementations. [`VaultStore`] owns the set of open vaults.

pub mod error;
pub mod events;
pub mod peer;
pub mod store;
pub mod synced;
pub mod vault;

pub use {
    error::{Result, VaultError},
    events::{KeyChange, SyncEvent},
    peer::{LocalPeer, PeerExchange},
    store::{BackendOptions, KeySource, StoreOptions, VaultStore},
    synced::{SyncMode, SyncReport, SyncStatus, SyncedVault},
    vault::{EncryptedVault, Item, VaultStatus},
};
