//! Seam between a synced vault and whatever carries deltas to other devices.

use std::sync::Arc;

use {
    async_trait::async_trait,
    cairn_replica::{Delta, StateVector},
};

use crate::{
    error::{Result, VaultError},
    synced::SyncedVault,
};

/// A remote replica reachable over some transport.
///
/// One sync round against a peer is: read its state vector, push what it is
/// missing, pull what we are missing.
#[async_trait]
pub trait PeerExchange: Send + Sync {
    /// Stable identifier, used as the origin of pulled deltas.
    fn peer_id(&self) -> &str;

    async fn state_vector(&self) -> Result<StateVector>;

    /// Deliver `delta`, produced by replica `origin`.
    async fn push(&self, delta: &Delta, origin: &str) -> Result<()>;

    /// Fetch every operation not covered by `since`.
    async fn pull(&self, since: &StateVector) -> Result<Delta>;
}

/// In-process peer wrapping another [`SyncedVault`].
///
/// Failures on the wrapped side surface as [`VaultError::Transport`], the way
/// a networked peer reports a remote error.
pub struct LocalPeer {
    id: String,
    vault: Arc<SyncedVault>,
}

impl LocalPeer {
    pub fn new(vault: Arc<SyncedVault>) -> Self {
        let id = vault.replica_id().to_string();
        Self { id, vault }
    }

    fn remote_error(&self, err: VaultError) -> VaultError {
        VaultError::Transport(format!("peer {}: {err}", self.id))
    }
}

#[async_trait]
impl PeerExchange for LocalPeer {
    fn peer_id(&self) -> &str {
        &self.id
    }

    async fn state_vector(&self) -> Result<StateVector> {
        Ok(self.vault.state_vector().await)
    }

    async fn push(&self, delta: &Delta, origin: &str) -> Result<()> {
        self.vault
            .apply_update(delta, Some(origin))
            .await
            .map_err(|e| self.remote_error(e))?;
        Ok(())
    }

    async fn pull(&self, since: &StateVector) -> Result<Delta> {
        self.vault
            .updates_since(since)
            .await
            .map_err(|e| self.remote_error(e))
    }
}
