use super::events::OrderEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Admin dashboard figures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryDashboard {
    pub total_orders: usize,
    pub delivered_orders: usize,
    pub active_drivers: usize,
    pub total_planned_distance_km: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Per-driver counts shown on the driver dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverOrderSummary {
    pub agent_id: String,
    pub pending: usize,
    pub delivered: usize,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl DriverOrderSummary {
    pub fn new(agent_id: String) -> Self {
        Self {
            agent_id,
            pending: 0,
            delivered: 0,
            last_delivery_at: None,
        }
    }

    pub fn apply_event(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::AgentAssigned { .. } => self.pending += 1,
            OrderEvent::OrderDelivered { timestamp, .. } => {
                self.pending = self.pending.saturating_sub(1);
                self.delivered += 1;
                self.last_delivery_at = Some(*timestamp);
            }
            OrderEvent::OrderCreated { .. } => {}
        }
    }
}

/// In-memory read models for delivery events.
#[derive(Debug, Default)]
pub struct DeliveryProjectionStore {
    pub dashboard: DeliveryDashboard,
    pub drivers: HashMap<String, DriverOrderSummary>,
    drivers_with_orders: HashSet<String>,
}

impl DeliveryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_event(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::OrderCreated { planned_distance_m, .. } => {
                self.dashboard.total_orders += 1;
                if let Some(meters) = planned_distance_m {
                    self.dashboard.total_planned_distance_km += meters / 1000.0;
                }
            }
            OrderEvent::AgentAssigned { agent_id, .. } => {
                self.drivers_with_orders.insert(agent_id.clone());
                self.dashboard.active_drivers = self.drivers_with_orders.len();
                self.drivers
                    .entry(agent_id.clone())
                    .or_insert_with(|| DriverOrderSummary::new(agent_id.clone()))
                    .apply_event(event);
            }
            OrderEvent::OrderDelivered { agent_id, .. } => {
                self.dashboard.delivered_orders += 1;
                self.drivers
                    .entry(agent_id.clone())
                    .or_insert_with(|| DriverOrderSummary::new(agent_id.clone()))
                    .apply_event(event);
            }
        }
        self.dashboard.last_activity = Some(crate::common::DomainEvent::occurred_at(event));
    }
}
