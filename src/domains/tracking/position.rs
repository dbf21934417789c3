use crate::domains::geo::{Coordinate, GeoError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw fix as reported by an agent's device, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSample {
    pub agent_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Device timestamp. Samples without one are stamped on ingestion.
    pub recorded_at: Option<DateTime<Utc>>,
    pub accuracy_m: Option<f64>,
}

impl PositionSample {
    pub fn new(agent_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            latitude,
            longitude,
            recorded_at: None,
            accuracy_m: None,
        }
    }

    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

/// An accepted position. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub agent_id: String,
    pub coordinate: Coordinate,
    pub recorded_at: DateTime<Utc>,
    pub accuracy_m: Option<f64>,
}

impl Position {
    pub fn new(
        agent_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, GeoError> {
        Ok(Self {
            agent_id: agent_id.into(),
            coordinate: Coordinate::new(latitude, longitude)?,
            recorded_at,
            accuracy_m: None,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.coordinate.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.coordinate.longitude
    }
}
