use crate::domains::geo::{distance, Coordinate, GeoError};
use crate::domains::tracking::{Position, PositionObserver};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;

/// Radius around the drop coordinate inside which a delivery may be
/// confirmed. The boundary itself counts as inside.
pub const DEFAULT_GEOFENCE_RADIUS_METERS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeofenceState {
    OutOfRange,
    InRange,
    /// Terminal.
    Confirmed,
}

/// Reasons a confirmation attempt is refused. These are expected outcomes
/// of the guard, not faults.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateDenial {
    #[error("Agent is outside the {radius_meters} m delivery radius (distance: {distance_meters:?} m)")]
    OutOfRange {
        distance_meters: Option<f64>,
        radius_meters: f64,
    },

    #[error("A delivery proof image is required")]
    ProofRequired,

    #[error("Delivery was already confirmed")]
    AlreadyConfirmed,
}

/// What the UI needs to enable or disable the confirm action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceStatus {
    pub order_id: String,
    pub agent_id: String,
    pub state: GeofenceState,
    pub distance_meters: Option<f64>,
    pub radius_meters: f64,
    pub last_fix_at: Option<DateTime<Utc>>,
}

/// Proximity gate for one (order, agent) pair.
#[derive(Debug, Clone)]
pub struct GeofenceGate {
    order_id: String,
    agent_id: String,
    target: Coordinate,
    radius_meters: f64,
    state: GeofenceState,
    distance_meters: Option<f64>,
    last_position: Option<Position>,
    confirmed_position: Option<Position>,
}

impl GeofenceGate {
    pub fn new(order_id: impl Into<String>, agent_id: impl Into<String>, target: Coordinate) -> Self {
        Self {
            order_id: order_id.into(),
            agent_id: agent_id.into(),
            target,
            radius_meters: DEFAULT_GEOFENCE_RADIUS_METERS,
            state: GeofenceState::OutOfRange,
            distance_meters: None,
            last_position: None,
            confirmed_position: None,
        }
    }

    pub fn with_radius(mut self, radius_meters: f64) -> Self {
        self.radius_meters = radius_meters;
        self
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> GeofenceState {
        self.state
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    /// Position that was live when the gate confirmed.
    pub fn confirmed_position(&self) -> Option<&Position> {
        self.confirmed_position.as_ref()
    }

    /// Feeds a newly accepted position. Positions of other agents are ignored.
    pub fn observe(&mut self, position: &Position) -> Result<GeofenceState, GeoError> {
        if position.agent_id != self.agent_id {
            return Ok(self.state);
        }
        let meters = distance(&position.coordinate, &self.target)?;
        self.last_position = Some(position.clone());
        Ok(self.evaluate_distance(meters))
    }

    /// Applies the range rule to an already computed distance.
    pub fn evaluate_distance(&mut self, distance_meters: f64) -> GeofenceState {
        self.distance_meters = Some(distance_meters);
        self.state = match self.state {
            GeofenceState::Confirmed => GeofenceState::Confirmed,
            _ if distance_meters <= self.radius_meters => GeofenceState::InRange,
            _ => GeofenceState::OutOfRange,
        };
        self.state
    }

    /// The confirm decision without side effects.
    pub fn check(&self, proof_present: bool) -> Result<(), GateDenial> {
        match self.state {
            GeofenceState::Confirmed => Err(GateDenial::AlreadyConfirmed),
            GeofenceState::OutOfRange => Err(GateDenial::OutOfRange {
                distance_meters: self.distance_meters,
                radius_meters: self.radius_meters,
            }),
            GeofenceState::InRange if !proof_present => Err(GateDenial::ProofRequired),
            GeofenceState::InRange => Ok(()),
        }
    }

    /// Moves the gate to `Confirmed` when it is in range and a proof exists.
    /// A denial leaves the state untouched.
    pub fn attempt_confirm(&mut self, proof_present: bool) -> Result<(), GateDenial> {
        self.check(proof_present)?;
        self.state = GeofenceState::Confirmed;
        self.confirmed_position = self.last_position.clone();
        Ok(())
    }

    pub fn status(&self) -> GeofenceStatus {
        GeofenceStatus {
            order_id: self.order_id.clone(),
            agent_id: self.agent_id.clone(),
            state: self.state,
            distance_meters: self.distance_meters,
            radius_meters: self.radius_meters,
            last_fix_at: self.last_position.as_ref().map(|p| p.recorded_at),
        }
    }
}

pub type SharedGate = Arc<Mutex<GeofenceGate>>;

#[derive(Default)]
struct RegistryState {
    gates: HashMap<String, SharedGate>,
    orders_by_agent: HashMap<String, Vec<String>>,
}

/// Owns the gates of all open orders and routes accepted positions to the
/// gates of the reporting agent.
#[derive(Default)]
pub struct GeofenceRegistry {
    state: RwLock<RegistryState>,
}

fn lock_gate(gate: &SharedGate) -> MutexGuard<'_, GeofenceGate> {
    gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GeofenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a gate, replacing any gate already held for the same order.
    pub fn register(&self, gate: GeofenceGate) -> SharedGate {
        let order_id = gate.order_id().to_string();
        let agent_id = gate.agent_id().to_string();
        let shared = Arc::new(Mutex::new(gate));

        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = state.gates.insert(order_id.clone(), shared.clone()) {
            let previous_agent = lock_gate(&previous).agent_id().to_string();
            if let Some(orders) = state.orders_by_agent.get_mut(&previous_agent) {
                orders.retain(|id| id != &order_id);
            }
        }
        state.orders_by_agent.entry(agent_id).or_default().push(order_id);
        shared
    }

    pub fn remove(&self, order_id: &str) -> Option<SharedGate> {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let gate = state.gates.remove(order_id)?;
        let agent_id = lock_gate(&gate).agent_id().to_string();
        if let Some(orders) = state.orders_by_agent.get_mut(&agent_id) {
            orders.retain(|id| id != order_id);
            if orders.is_empty() {
                state.orders_by_agent.remove(&agent_id);
            }
        }
        Some(gate)
    }

    pub fn gate(&self, order_id: &str) -> Option<SharedGate> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gates
            .get(order_id)
            .cloned()
    }

    /// Runs `f` with exclusive access to an order's gate.
    pub fn with_gate<R>(&self, order_id: &str, f: impl FnOnce(&mut GeofenceGate) -> R) -> Option<R> {
        let gate = self.gate(order_id)?;
        let mut guard = lock_gate(&gate);
        Some(f(&mut guard))
    }

    pub fn status(&self, order_id: &str) -> Option<GeofenceStatus> {
        self.with_gate(order_id, |gate| gate.status())
    }

    /// Evaluates every gate of the position's agent. Returns the new state of
    /// each evaluated gate keyed by order.
    pub fn on_position(&self, position: &Position) -> Vec<(String, GeofenceState)> {
        let gates: Vec<SharedGate> = {
            let state = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            state
                .orders_by_agent
                .get(&position.agent_id)
                .map(|orders| orders.iter().filter_map(|id| state.gates.get(id).cloned()).collect())
                .unwrap_or_default()
        };

        let mut transitions = Vec::with_capacity(gates.len());
        for gate in gates {
            let mut gate = lock_gate(&gate);
            match gate.observe(position) {
                Ok(state) => transitions.push((gate.order_id().to_string(), state)),
                Err(e) => tracing::warn!(order_id = gate.order_id(), "geofence evaluation failed: {}", e),
            }
        }
        transitions
    }

    pub fn orders_for_agent(&self, agent_id: &str) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .orders_by_agent
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl PositionObserver for GeofenceRegistry {
    fn observe_position(&self, position: &Position) {
        for (order_id, state) in self.on_position(position) {
            if state == GeofenceState::InRange {
                tracing::debug!(order_id = %order_id, agent_id = %position.agent_id, "agent within delivery radius");
            }
        }
    }
}
