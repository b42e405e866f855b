use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Failed to start processor: {0}")]
    Spawn(String),

    #[error("Processor workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Processor pool closed")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
