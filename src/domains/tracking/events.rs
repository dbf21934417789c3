use super::position::Position;
use crate::common::DomainEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted once for every position the ingestor accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecorded {
    pub position: Position,
    pub ingested_at: DateTime<Utc>,
}

impl PositionRecorded {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            ingested_at: Utc::now(),
        }
    }
}

impl DomainEvent for PositionRecorded {
    fn event_type(&self) -> &'static str {
        "PositionRecorded"
    }

    fn aggregate_id(&self) -> &str {
        &self.position.agent_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.position.recorded_at
    }
}
