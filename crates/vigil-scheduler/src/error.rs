use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The schedule definition is invalid or can never fire.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The job's current status does not allow the operation.
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Scheduler store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
