use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store call panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
