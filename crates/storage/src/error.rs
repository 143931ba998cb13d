use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid stored record in namespace {namespace}: {message}")]
    InvalidRecord { namespace: String, message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_record(namespace: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            namespace: namespace.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
