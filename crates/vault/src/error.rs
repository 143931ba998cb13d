//! Vault error types.

use cairn_crypto::CryptoError;

/// Errors produced by vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Raw key material was not exactly 32 bytes.
    #[error("invalid key length: expected 32 bytes, got {len}")]
    InvalidKeyLength { len: usize },

    /// Wrong key, wrong password or tampered ciphertext.
    #[error("authentication failed: wrong key or tampered data")]
    AuthenticationFailure,

    /// No key has been installed yet.
    #[error("vault is not initialized")]
    NotInitialized,

    /// A key is already installed.
    #[error("vault is already initialized")]
    AlreadyInitialized,

    /// The vault was destroyed; it cannot be used again.
    #[error("vault has been destroyed")]
    Destroyed,

    /// Entry keys must be non-empty.
    #[error("entry key must not be empty")]
    EmptyKey,

    #[error("vault already exists: {name}")]
    DuplicateVault { name: String },

    #[error("no such vault: {name}")]
    UnknownVault { name: String },

    /// A delta was rejected by the replication layer.
    #[error("malformed delta: {reason}")]
    MalformedDelta { reason: String },

    /// The persisted replication journal could not be replayed.
    #[error("corrupt replication journal: {reason}")]
    CorruptJournal { reason: String },

    /// Exchange with a peer failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] cairn_storage::Error),

    /// Base64 decoding of stored metadata failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeyLength { len } => Self::InvalidKeyLength { len },
            CryptoError::AuthenticationFailure => Self::AuthenticationFailure,
            other => Self::Crypto(other),
        }
    }
}

impl From<cairn_replica::ReplicaError> for VaultError {
    fn from(err: cairn_replica::ReplicaError) -> Self {
        use cairn_replica::ReplicaError;
        match err {
            ReplicaError::MalformedDelta { reason } => Self::MalformedDelta { reason },
            ReplicaError::CorruptJournal { reason } => Self::CorruptJournal { reason },
            ReplicaError::Json(e) => Self::Json(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
