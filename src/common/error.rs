use thiserror::Error;

/// Errors raised by aggregates while applying commands or events.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Aggregate not found: {id}")]
    AggregateNotFound { id: String },

    #[error("Invalid transition for {aggregate_id}: {reason}")]
    InvalidTransition { aggregate_id: String, reason: String },

    #[error("Concurrency conflict: expected version {expected}, got {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Infrastructure error: {0}")]
    InfrastructureError(String),
}

impl DomainError {
    pub fn invalid_transition(aggregate_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            aggregate_id: aggregate_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum EventStoreError {
    #[error("Version mismatch for {aggregate_id}: expected {expected}, stored {actual}")]
    VersionMismatch {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
pub type ApplicationResult<T> = Result<T, ApplicationError>;
