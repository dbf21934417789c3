use super::events::PositionRecorded;
use super::position::Position;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
#[error("Publisher {publisher} failed: {reason}")]
pub struct PublishError {
    pub publisher: String,
    pub reason: String,
}

/// Persistent backing for the append-only per-agent position log.
#[async_trait]
pub trait PositionLog: Send + Sync {
    /// Appends `position`. Appending the same position twice stores it once,
    /// so repeating an append that timed out is harmless.
    async fn append(&self, position: &Position) -> Result<(), StorageError>;

    async fn latest(&self, agent_id: &str) -> Result<Option<Position>, StorageError>;

    /// Most recent `limit` positions of an agent, oldest first.
    async fn history(&self, agent_id: &str, limit: usize) -> Result<Vec<Position>, StorageError>;
}

/// Outbound bus for accepted positions (Kafka and friends).
#[async_trait]
pub trait PositionPublisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, event: &PositionRecorded) -> Result<(), PublishError>;
}

/// Synchronous reaction to every accepted position, run before the position
/// leaves the process. Implementations must not block or do I/O.
pub trait PositionObserver: Send + Sync {
    fn observe_position(&self, position: &Position);
}
