use crate::domains::delivery::{
    DeliveryProof, ImageStore, Order, OrderRepository, OrderStatus, ProofStore, RepositoryError,
    UploadError,
};
use crate::domains::tracking::{Position, PositionLog, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryPositionLog {
    positions: RwLock<HashMap<String, Vec<Position>>>,
}

impl InMemoryPositionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, agent_id: &str) -> usize {
        self.positions
            .read()
            .await
            .get(agent_id)
            .map_or(0, |positions| positions.len())
    }
}

#[async_trait]
impl PositionLog for InMemoryPositionLog {
    async fn append(&self, position: &Position) -> Result<(), StorageError> {
        let mut positions = self.positions.write().await;
        let log = positions.entry(position.agent_id.clone()).or_default();
        if log.last().is_some_and(|last| last.recorded_at >= position.recorded_at) {
            return Ok(());
        }
        log.push(position.clone());
        Ok(())
    }

    async fn latest(&self, agent_id: &str) -> Result<Option<Position>, StorageError> {
        Ok(self
            .positions
            .read()
            .await
            .get(agent_id)
            .and_then(|positions| positions.last().cloned()))
    }

    async fn history(&self, agent_id: &str, limit: usize) -> Result<Vec<Position>, StorageError> {
        let positions = self.positions.read().await;
        Ok(positions
            .get(agent_id)
            .map(|all| all[all.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default())
    }
}

/// Order table held in memory. Versions and forward-only status moves are
/// enforced the same way the Postgres store enforces them.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version(order: &Order, expected_version: u64) -> Result<(), RepositoryError> {
    if order.version != expected_version {
        return Err(RepositoryError::conflict(
            &order.id,
            format!("expected version {}, stored {}", expected_version, order.version),
        ));
    }
    Ok(())
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get(&self, order_id: &str) -> Result<Order, RepositoryError> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(order_id.to_string()))
    }

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::conflict(&order.id, "order already exists"));
        }
        let mut stored = order.clone();
        crate::common::AggregateRoot::take_uncommitted_events(&mut stored);
        orders.insert(order.id.clone(), stored);
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| RepositoryError::NotFound(order_id.to_string()))?;

        check_version(order, expected_version)?;
        if !order.status.can_advance_to(status) {
            return Err(RepositoryError::conflict(
                order_id,
                format!("cannot move from {} to {}", order.status, status),
            ));
        }

        order.status = status;
        if status == OrderStatus::Delivered {
            order.delivered_at = Some(chrono::Utc::now());
        }
        order.version += 1;
        Ok(order.version)
    }

    async fn assign_agent(
        &self,
        order_id: &str,
        agent_id: &str,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| RepositoryError::NotFound(order_id.to_string()))?;

        check_version(order, expected_version)?;
        if !order.status.can_advance_to(OrderStatus::Assigned) {
            return Err(RepositoryError::conflict(
                order_id,
                format!("cannot assign an order that is {}", order.status),
            ));
        }

        order.assigned_agent_id = Some(agent_id.to_string());
        order.status = OrderStatus::Assigned;
        order.version += 1;
        Ok(order.version)
    }

    async fn list(&self) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<Order>, RepositoryError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|order| order.assigned_agent_id.as_deref() == Some(agent_id))
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProofStore {
    proofs: RwLock<HashMap<String, DeliveryProof>>,
}

impl InMemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProofStore for InMemoryProofStore {
    async fn create(&self, proof: &DeliveryProof) -> Result<DeliveryProof, RepositoryError> {
        Ok(self
            .proofs
            .write()
            .await
            .entry(proof.order_id.clone())
            .or_insert_with(|| proof.clone())
            .clone())
    }

    async fn get(&self, order_id: &str) -> Result<Option<DeliveryProof>, RepositoryError> {
        Ok(self.proofs.read().await.get(order_id).cloned())
    }
}

/// Keeps uploaded images in memory and hands out `memory://` URLs.
#[derive(Debug, Default)]
pub struct InMemoryImageStore {
    images: RwLock<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following upload fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn image(&self, url: &str) -> Option<Vec<u8>> {
        self.images.read().await.get(url).cloned()
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, UploadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UploadError(format!("storage rejected {}", file_name)));
        }
        if bytes.is_empty() {
            return Err(UploadError(format!("{} is empty", file_name)));
        }

        let url = format!("memory://delivery-proofs/{}-{}", uuid::Uuid::new_v4(), file_name);
        self.images.write().await.insert(url.clone(), bytes.to_vec());
        Ok(url)
    }
}
