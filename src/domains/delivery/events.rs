use super::aggregate::Stop;
use crate::common::DomainEvent;
use crate::domains::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated {
        order_id: String,
        pickup: Stop,
        drop: Stop,
        planned_distance_m: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    AgentAssigned {
        order_id: String,
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    OrderDelivered {
        order_id: String,
        agent_id: String,
        image_ref: String,
        captured_at: Coordinate,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "OrderCreated",
            OrderEvent::AgentAssigned { .. } => "AgentAssigned",
            OrderEvent::OrderDelivered { .. } => "OrderDelivered",
        }
    }

    fn aggregate_id(&self) -> &str {
        match self {
            OrderEvent::OrderCreated { order_id, .. }
            | OrderEvent::AgentAssigned { order_id, .. }
            | OrderEvent::OrderDelivered { order_id, .. } => order_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated { timestamp, .. }
            | OrderEvent::AgentAssigned { timestamp, .. }
            | OrderEvent::OrderDelivered { timestamp, .. } => *timestamp,
        }
    }
}
