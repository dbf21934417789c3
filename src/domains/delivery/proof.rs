use crate::domains::tracking::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Photographic proof of delivery. At most one exists per order; a retried
/// confirmation overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryProof {
    pub order_id: String,
    pub agent_id: String,
    pub captured_position: Position,
    pub image_ref: String,
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryProof {
    pub fn new(
        order_id: impl Into<String>,
        captured_position: Position,
        image_ref: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            agent_id: captured_position.agent_id.clone(),
            captured_position,
            image_ref: image_ref.into(),
            delivered_at: Utc::now(),
        }
    }
}
