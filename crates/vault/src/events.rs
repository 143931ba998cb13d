//! Events published by a synced vault.

use {cairn_replica::ChangeAction, serde::Serialize};

/// A visible change to one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyChange {
    pub key: String,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    SyncStart {
        vault: String,
    },
    SyncComplete {
        vault: String,
        /// Operations integrated from peers during the round.
        integrated: usize,
    },
    SyncError {
        vault: String,
        peer: Option<String>,
        message: String,
    },
    /// Entries changed, locally (`origin: None`) or from a peer.
    Update {
        vault: String,
        origin: Option<String>,
        changes: Vec<KeyChange>,
    },
    Connected {
        vault: String,
        peer: String,
    },
    Disconnected {
        vault: String,
        peer: String,
    },
}
