use super::events::OrderEvent;
use super::proof::DeliveryProof;
use crate::common::{AggregateRoot, DomainError, DomainResult};
use crate::domains::geo::{distance, Coordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Assigned,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Delivered => "delivered",
        }
    }

    /// Only single forward steps are legal: created → assigned → delivered.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Created, OrderStatus::Assigned)
                | (OrderStatus::Assigned, OrderStatus::Delivered)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "assigned" => Ok(OrderStatus::Assigned),
            "delivered" => Ok(OrderStatus::Delivered),
            other => Err(DomainError::InfrastructureError(format!(
                "unknown order status '{}'",
                other
            ))),
        }
    }
}

/// Pickup or drop point of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub address: Option<String>,
    pub coordinate: Coordinate,
}

impl Stop {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            address: None,
            coordinate,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub pickup: Stop,
    pub drop: Stop,
    pub assigned_agent_id: Option<String>,
    pub status: OrderStatus,
    pub planned_distance_m: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub version: u64,
    #[serde(skip)]
    uncommitted_events: Vec<OrderEvent>,
}

impl Order {
    pub fn create(
        id: impl Into<String>,
        pickup: Stop,
        drop: Stop,
        planned_distance_m: Option<f64>,
    ) -> Self {
        let id = id.into();
        let timestamp = Utc::now();
        let mut order = Self {
            id: id.clone(),
            pickup: pickup.clone(),
            drop: drop.clone(),
            assigned_agent_id: None,
            status: OrderStatus::Created,
            planned_distance_m,
            created_at: timestamp,
            delivered_at: None,
            version: 1,
            uncommitted_events: Vec::new(),
        };

        order.add_event(OrderEvent::OrderCreated {
            order_id: id,
            pickup,
            drop,
            planned_distance_m,
            timestamp,
        });
        order
    }

    /// Starting point for rebuilding an order from its events.
    pub fn empty(id: impl Into<String>) -> Self {
        let origin = Stop::new(Coordinate {
            latitude: 0.0,
            longitude: 0.0,
        });
        Self {
            id: id.into(),
            pickup: origin.clone(),
            drop: origin,
            assigned_agent_id: None,
            status: OrderStatus::Created,
            planned_distance_m: None,
            created_at: Utc::now(),
            delivered_at: None,
            version: 0,
            uncommitted_events: Vec::new(),
        }
    }

    pub fn assign(&mut self, agent_id: impl Into<String>) -> DomainResult<()> {
        let agent_id = agent_id.into();
        if let Some(current) = &self.assigned_agent_id {
            return Err(DomainError::invalid_transition(
                &self.id,
                format!("already assigned to {}", current),
            ));
        }
        self.ensure_can_advance(OrderStatus::Assigned)?;

        self.raise(OrderEvent::AgentAssigned {
            order_id: self.id.clone(),
            agent_id,
            timestamp: Utc::now(),
        })
    }

    /// Commits the delivery. The proof must belong to this order and the
    /// assigned agent, and its captured position must lie within
    /// `radius_meters` of the drop coordinate.
    pub fn mark_delivered(&mut self, proof: &DeliveryProof, radius_meters: f64) -> DomainResult<()> {
        self.ensure_can_advance(OrderStatus::Delivered)?;

        if proof.order_id != self.id {
            return Err(DomainError::invalid_transition(
                &self.id,
                format!("proof belongs to order {}", proof.order_id),
            ));
        }
        if self.assigned_agent_id.as_deref() != Some(proof.agent_id.as_str()) {
            return Err(DomainError::invalid_transition(
                &self.id,
                format!("agent {} is not assigned to this order", proof.agent_id),
            ));
        }

        let meters = distance(&proof.captured_position.coordinate, &self.drop.coordinate)
            .map_err(|e| DomainError::invalid_transition(&self.id, e.to_string()))?;
        if meters > radius_meters {
            return Err(DomainError::invalid_transition(
                &self.id,
                format!(
                    "proof captured {:.1} m from the drop point (radius {} m)",
                    meters, radius_meters
                ),
            ));
        }

        self.raise(OrderEvent::OrderDelivered {
            order_id: self.id.clone(),
            agent_id: proof.agent_id.clone(),
            image_ref: proof.image_ref.clone(),
            captured_at: proof.captured_position.coordinate,
            timestamp: proof.delivered_at,
        })
    }

    fn ensure_can_advance(&self, next: OrderStatus) -> DomainResult<()> {
        if self.status.can_advance_to(next) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(
                &self.id,
                format!("cannot move from {} to {}", self.status, next),
            ))
        }
    }
}

impl AggregateRoot for Order {
    type Event = OrderEvent;

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) -> DomainResult<()> {
        match event {
            OrderEvent::OrderCreated {
                order_id,
                pickup,
                drop,
                planned_distance_m,
                timestamp,
            } => {
                self.id = order_id.clone();
                self.pickup = pickup.clone();
                self.drop = drop.clone();
                self.planned_distance_m = *planned_distance_m;
                self.status = OrderStatus::Created;
                self.created_at = *timestamp;
            }
            OrderEvent::AgentAssigned { agent_id, .. } => {
                self.assigned_agent_id = Some(agent_id.clone());
                self.status = OrderStatus::Assigned;
            }
            OrderEvent::OrderDelivered { timestamp, .. } => {
                self.status = OrderStatus::Delivered;
                self.delivered_at = Some(*timestamp);
            }
        }
        self.version += 1;
        Ok(())
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn take_uncommitted_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.uncommitted_events)
    }

    fn add_event(&mut self, event: Self::Event) {
        self.uncommitted_events.push(event);
    }
}
