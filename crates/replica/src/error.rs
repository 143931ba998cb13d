use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The delta could not be decoded or contradicts operations already held.
    /// Nothing from it was applied.
    #[error("malformed delta: {reason}")]
    MalformedDelta { reason: String },

    /// A persisted journal record could not be decoded.
    #[error("corrupt journal: {reason}")]
    CorruptJournal { reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReplicaError {
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDelta {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn corrupt_journal(reason: impl Into<String>) -> Self {
        Self::CorruptJournal {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
