use std::error::Error;
use thiserror::Error;

/// Result alias for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Error raised by snapshot persistence backends.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The backend could not be read or written.
    #[error("persisted state unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The stored record exists but cannot be decoded.
    #[error("persisted state is corrupt: {message}")]
    Corrupt {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        PersistError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }
}
