use crate::common::{AggregateRoot, DomainError};
use crate::domains::delivery::{
    DeliveryProof, GateDenial, GeofenceGate, GeofenceRegistry, GeofenceState, GeofenceStatus,
    Geocoder, ImageStore, MappingError, Order, OrderEventEmitter, OrderRepository, OrderStatus,
    ProofStore, RepositoryError, RouteDistance, Stop, UploadError, DEFAULT_GEOFENCE_RADIUS_METERS,
};
use crate::domains::geo::{Coordinate, GeoError};
use crate::domains::logger::DynLogger;
use crate::domains::session::{Role, Session, SessionError};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Agent {agent_id} is not assigned to order {order_id}")]
    NotAssignedAgent { order_id: String, agent_id: String },

    #[error("Order {0} is already delivered")]
    AlreadyDelivered(String),

    #[error("Confirmation denied: {0}")]
    Denied(#[from] GateDenial),

    #[error("No geofence is tracking order {0}")]
    NoGate(String),

    #[error("No live position was captured for order {0}")]
    NoLivePosition(String),

    #[error(transparent)]
    UploadFailure(#[from] UploadError),

    #[error("Conflicting update on order {order_id}: {reason}")]
    RepositoryConflict { order_id: String, reason: String },

    #[error("Could not geocode {address}: {source}")]
    Geocoding { address: String, source: MappingError },

    #[error(transparent)]
    InvalidCoordinate(#[from] GeoError),

    #[error("Invalid order draft: {0}")]
    InvalidDraft(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Repository error: {0}")]
    Repository(String),
}

impl DeliveryError {
    /// Transient infrastructure faults; the same call may be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::UploadFailure(_)
                | DeliveryError::RepositoryConflict { .. }
                | DeliveryError::Repository(_)
        )
    }

    /// Expected guard outcomes rather than faults.
    pub fn is_denial(&self) -> bool {
        matches!(self, DeliveryError::Denied(_))
    }
}

impl From<RepositoryError> for DeliveryError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(order_id) => DeliveryError::NotFound(order_id),
            RepositoryError::Conflict { order_id, reason } => {
                DeliveryError::RepositoryConflict { order_id, reason }
            }
            RepositoryError::Backend(reason) => DeliveryError::Repository(reason),
        }
    }
}

/// One end of an order as entered by an admin. At least one of the fields
/// must be set; a missing coordinate is geocoded from the address.
#[derive(Debug, Clone, Default)]
pub struct StopDraft {
    pub address: Option<String>,
    pub coordinate: Option<Coordinate>,
}

impl StopDraft {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            coordinate: None,
        }
    }

    pub fn coordinate(coordinate: Coordinate) -> Self {
        Self {
            address: None,
            coordinate: Some(coordinate),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderDraft {
    pub pickup: StopDraft,
    pub drop: StopDraft,
    /// Assigns the order in the same call.
    pub agent_id: Option<String>,
}

/// Photo taken by the driver at the drop point.
#[derive(Debug, Clone)]
pub struct ProofImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ProofImage {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// Collaborators the delivery workflow depends on.
#[derive(Clone)]
pub struct DeliveryPorts {
    pub orders: Arc<dyn OrderRepository>,
    pub proofs: Arc<dyn ProofStore>,
    pub images: Arc<dyn ImageStore>,
    pub geocoder: Arc<dyn Geocoder>,
    pub routes: Arc<dyn RouteDistance>,
}

/// Order lifecycle: creation and assignment by admins, geofence-gated
/// confirmation by the assigned driver.
pub struct DeliveryService {
    ports: DeliveryPorts,
    registry: Arc<GeofenceRegistry>,
    radius_meters: f64,
    emitter: OrderEventEmitter,
    logger: DynLogger,
}

impl DeliveryService {
    pub fn new(
        ports: DeliveryPorts,
        registry: Arc<GeofenceRegistry>,
        emitter: OrderEventEmitter,
        logger: DynLogger,
    ) -> Self {
        Self {
            ports,
            registry,
            radius_meters: DEFAULT_GEOFENCE_RADIUS_METERS,
            emitter,
            logger,
        }
    }

    pub fn with_radius(mut self, radius_meters: f64) -> Self {
        self.radius_meters = radius_meters;
        self
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    pub async fn create_order(
        &self,
        session: &Session,
        draft: OrderDraft,
    ) -> Result<Order, DeliveryError> {
        session.require(Role::Admin)?;

        let pickup = self.resolve_stop("pickup", draft.pickup).await?;
        let drop = self.resolve_stop("drop", draft.drop).await?;

        let planned_distance_m = match self
            .ports
            .routes
            .driving_distance(&pickup.coordinate, &drop.coordinate)
            .await
        {
            Ok(meters) => Some(meters),
            Err(e) => {
                self.logger
                    .warn(&format!("planned distance unavailable: {}", e));
                None
            }
        };

        let mut order = Order::create(Uuid::new_v4().to_string(), pickup, drop, planned_distance_m);
        self.ports.orders.insert(&order).await?;
        self.emitter.emit(order.take_uncommitted_events()).await;

        tracing::info!(order_id = %order.id, created_by = session.user_id(), "order created");

        match draft.agent_id {
            Some(agent_id) => self.assign_agent(session, &order.id, &agent_id).await,
            None => Ok(order),
        }
    }

    /// Assigns a driver and starts watching their distance to the drop point.
    pub async fn assign_agent(
        &self,
        session: &Session,
        order_id: &str,
        agent_id: &str,
    ) -> Result<Order, DeliveryError> {
        session.require(Role::Admin)?;

        let mut order = self.ports.orders.get(order_id).await?;
        let expected_version = order.version;
        order.assign(agent_id)?;

        order.version = self
            .ports
            .orders
            .assign_agent(order_id, agent_id, expected_version)
            .await?;

        self.registry.register(
            GeofenceGate::new(order_id, agent_id, order.drop.coordinate).with_radius(self.radius_meters),
        );
        self.emitter.emit(order.take_uncommitted_events()).await;

        self.logger
            .info(&format!("order {} assigned to agent {}", order_id, agent_id));
        Ok(order)
    }

    /// Registers gates for every assigned order, e.g. after a restart.
    /// Returns how many gates were registered.
    pub async fn restore_gates(&self) -> Result<usize, DeliveryError> {
        let mut restored = 0;
        for order in self.ports.orders.list().await? {
            let Some(agent_id) = order.assigned_agent_id.as_deref() else {
                continue;
            };
            if order.status != OrderStatus::Assigned || self.registry.gate(&order.id).is_some() {
                continue;
            }
            self.registry.register(
                GeofenceGate::new(&order.id, agent_id, order.drop.coordinate)
                    .with_radius(self.radius_meters),
            );
            restored += 1;
        }
        Ok(restored)
    }

    pub fn geofence_status(&self, order_id: &str) -> Option<GeofenceStatus> {
        self.registry.status(order_id)
    }

    /// Confirms delivery of an order by its assigned driver.
    ///
    /// The driver's live position must be inside the order's geofence and a
    /// proof image must be supplied. The proof is stored before the status
    /// moves to delivered and is never replaced: if the status write fails
    /// the order stays assigned, and a repeated call reuses the stored proof.
    pub async fn confirm(
        &self,
        session: &Session,
        order_id: &str,
        image: Option<ProofImage>,
    ) -> Result<DeliveryProof, DeliveryError> {
        let identity = session.require(Role::Driver)?;
        let agent_id = identity.user_id.as_str();

        let mut order = self.ports.orders.get(order_id).await?;
        if order.status == OrderStatus::Delivered {
            return Err(DeliveryError::AlreadyDelivered(order_id.to_string()));
        }
        if order.status != OrderStatus::Assigned
            || order.assigned_agent_id.as_deref() != Some(agent_id)
        {
            return Err(DeliveryError::NotAssignedAgent {
                order_id: order_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }

        let image = image.filter(|image| !image.bytes.is_empty());
        let proof_present = image.is_some();

        // A gate that is already confirmed means an earlier attempt got past
        // the gate and failed on a later write.
        let was_confirmed = self
            .registry
            .with_gate(order_id, |gate| {
                if gate.state() == GeofenceState::Confirmed {
                    Ok(true)
                } else {
                    gate.check(proof_present).map(|_| false)
                }
            })
            .ok_or_else(|| DeliveryError::NoGate(order_id.to_string()))??;

        let Some(image) = image else {
            return Err(GateDenial::ProofRequired.into());
        };

        let stored = if was_confirmed {
            self.ports.proofs.get(order_id).await?
        } else {
            None
        };
        let proof = match stored {
            Some(proof) => proof,
            None => self.capture_proof(order_id, &image, was_confirmed).await?,
        };

        let expected_version = order.version;
        order.mark_delivered(&proof, self.radius_meters)?;

        let committed = self
            .ports
            .orders
            .update_status(order_id, OrderStatus::Delivered, expected_version)
            .await;
        order.version = match committed {
            Ok(version) => version,
            Err(RepositoryError::Conflict { order_id, reason }) => {
                if self.ports.orders.get(&order_id).await?.status == OrderStatus::Delivered {
                    return Err(DeliveryError::AlreadyDelivered(order_id));
                }
                return Err(DeliveryError::RepositoryConflict { order_id, reason });
            }
            Err(e) => return Err(e.into()),
        };

        self.registry.remove(order_id);
        self.emitter.emit(order.take_uncommitted_events()).await;

        self.logger.info(&format!(
            "order {} delivered by agent {} at {}",
            order_id, agent_id, proof.captured_position.coordinate
        ));
        Ok(proof)
    }

    /// Uploads the image, closes the gate and stores the proof. When another
    /// call stored a proof first, that proof is returned instead.
    async fn capture_proof(
        &self,
        order_id: &str,
        image: &ProofImage,
        was_confirmed: bool,
    ) -> Result<DeliveryProof, DeliveryError> {
        let image_ref = self
            .ports
            .images
            .store(&image.file_name, &image.bytes)
            .await?;

        let captured = self
            .registry
            .with_gate(order_id, |gate| {
                if !was_confirmed {
                    gate.attempt_confirm(true)?;
                }
                Ok::<_, GateDenial>(gate.confirmed_position().cloned())
            })
            .ok_or_else(|| DeliveryError::NoGate(order_id.to_string()))??
            .ok_or_else(|| DeliveryError::NoLivePosition(order_id.to_string()))?;

        let candidate = DeliveryProof::new(order_id, captured, image_ref);
        let stored = self.ports.proofs.create(&candidate).await?;
        if stored.image_ref != candidate.image_ref {
            tracing::debug!(order_id, "proof already stored by a concurrent confirmation");
        }
        Ok(stored)
    }

    pub async fn proof(&self, order_id: &str) -> Result<Option<DeliveryProof>, DeliveryError> {
        Ok(self.ports.proofs.get(order_id).await?)
    }

    pub async fn order(&self, order_id: &str) -> Result<Order, DeliveryError> {
        Ok(self.ports.orders.get(order_id).await?)
    }

    /// All orders for admins, the caller's own orders for drivers.
    pub async fn orders_for(&self, session: &Session) -> Result<Vec<Order>, DeliveryError> {
        let orders = match session.role() {
            Role::Admin => self.ports.orders.list().await?,
            Role::Driver => self.ports.orders.list_by_agent(session.user_id()).await?,
        };
        Ok(orders)
    }

    async fn resolve_stop(&self, label: &str, draft: StopDraft) -> Result<Stop, DeliveryError> {
        let coordinate = match (draft.coordinate, draft.address.as_deref()) {
            (Some(coordinate), _) => {
                coordinate.validate()?;
                coordinate
            }
            (None, Some(address)) => self
                .ports
                .geocoder
                .resolve(address)
                .await
                .map_err(|source| DeliveryError::Geocoding {
                    address: address.to_string(),
                    source,
                })?,
            (None, None) => {
                return Err(DeliveryError::InvalidDraft(format!(
                    "{} needs an address or a coordinate",
                    label
                )))
            }
        };

        let stop = Stop::new(coordinate);
        Ok(match draft.address {
            Some(address) => stop.with_address(address),
            None => stop,
        })
    }
}
