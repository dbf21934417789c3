use super::aggregate::{Order, OrderStatus};
use super::proof::DeliveryProof;
use crate::domains::geo::Coordinate;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Conflicting write on order {order_id}: {reason}")]
    Conflict { order_id: String, reason: String },

    #[error("Repository backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn conflict(order_id: &str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            order_id: order_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Image upload failed: {0}")]
pub struct UploadError(pub String);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("No match for {0}")]
    NotFound(String),

    #[error("Route service unavailable: {0}")]
    Unavailable(String),
}

/// Order storage with optimistic concurrency: every write names the version
/// it expects to replace and status writes only move forward.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get(&self, order_id: &str) -> Result<Order, RepositoryError>;

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Returns the new version.
    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        expected_version: u64,
    ) -> Result<u64, RepositoryError>;

    /// Returns the new version.
    async fn assign_agent(
        &self,
        order_id: &str,
        agent_id: &str,
        expected_version: u64,
    ) -> Result<u64, RepositoryError>;

    async fn list(&self) -> Result<Vec<Order>, RepositoryError>;

    async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<Order>, RepositoryError>;
}

/// Proof records keyed by order. A proof is written once and never replaced.
#[async_trait]
pub trait ProofStore: Send + Sync {
    /// Stores `proof` unless the order already has one, and returns whichever
    /// proof is stored afterwards.
    async fn create(&self, proof: &DeliveryProof) -> Result<DeliveryProof, RepositoryError>;

    async fn get(&self, order_id: &str) -> Result<Option<DeliveryProof>, RepositoryError>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores the image and returns its public URL.
    async fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, UploadError>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, address: &str) -> Result<Coordinate, MappingError>;

    async fn reverse(&self, coordinate: &Coordinate) -> Result<String, MappingError>;
}

/// Driving distance lookups. Only used to prefill the planned distance of an
/// order, never for geofence checks.
#[async_trait]
pub trait RouteDistance: Send + Sync {
    async fn driving_distance(
        &self,
        origin: &Coordinate,
        destination: &Coordinate,
    ) -> Result<f64, MappingError>;
}
