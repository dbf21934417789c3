use super::events::OrderEvent;
use super::projections::{DeliveryDashboard, DeliveryProjectionStore, DriverOrderSummary};
use crate::common::{ApplicationResult, DomainEvent, EventEnvelope, EventMetadata, EventStore};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Read handle on the projections maintained by [`DeliveryEventActor`].
#[derive(Clone, Default)]
pub struct DeliveryProjections {
    store: Arc<RwLock<DeliveryProjectionStore>>,
}

impl DeliveryProjections {
    pub async fn dashboard(&self) -> DeliveryDashboard {
        self.store.read().await.dashboard.clone()
    }

    pub async fn driver_summary(&self, agent_id: &str) -> Option<DriverOrderSummary> {
        self.store.read().await.drivers.get(agent_id).cloned()
    }
}

/// Persists order events and keeps the delivery projections current.
pub struct DeliveryEventActor {
    event_store: Arc<dyn EventStore>,
    projections: DeliveryProjections,
    event_receiver: mpsc::Receiver<OrderEvent>,
}

impl DeliveryEventActor {
    pub fn new(event_store: Arc<dyn EventStore>, event_receiver: mpsc::Receiver<OrderEvent>) -> Self {
        Self {
            event_store,
            projections: DeliveryProjections::default(),
            event_receiver,
        }
    }

    pub fn projections(&self) -> DeliveryProjections {
        self.projections.clone()
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.event_receiver.recv().await {
            if let Err(e) = self.handle_event(event).await {
                tracing::error!("Failed to handle order event: {}", e);
            }
        }
        tracing::debug!("delivery event actor stopped");
    }

    async fn handle_event(&self, event: OrderEvent) -> ApplicationResult<()> {
        let envelope = EventEnvelope::new(&event, "Order", EventMetadata::from_source("DeliveryEventActor"))
            .map_err(crate::common::DomainError::from)?;

        let order_id = event.aggregate_id();
        let version = self.event_store.stream_version(order_id).await?;
        self.event_store
            .append_events(order_id, version, vec![envelope])
            .await?;

        self.projections.store.write().await.apply_event(&event);

        tracing::info!(order_id, event_type = event.event_type(), "handled order event");
        Ok(())
    }
}

/// Sending side used by services to hand committed events to the actor.
#[derive(Clone)]
pub struct OrderEventEmitter {
    sender: mpsc::Sender<OrderEvent>,
}

impl OrderEventEmitter {
    pub fn new(sender: mpsc::Sender<OrderEvent>) -> Self {
        Self { sender }
    }

    /// Events are dropped with a warning once the actor has stopped.
    pub async fn emit(&self, events: Vec<OrderEvent>) {
        for event in events {
            if let Err(e) = self.sender.send(event).await {
                tracing::warn!("order event dropped, actor not running: {}", e);
            }
        }
    }
}
