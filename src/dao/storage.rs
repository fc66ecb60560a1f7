use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by room repositories regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The addressed room, player or playlist does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The caller is not the owner of the room it tried to mutate.
    #[error("caller is not the room owner")]
    NotOwner,
    /// The mutation was rejected by the repository (out-of-range index, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Shorthand for a missing room.
    pub fn room_not_found(room_id: impl std::fmt::Display) -> Self {
        StorageError::NotFound(format!("room `{room_id}` not found"))
    }
}
