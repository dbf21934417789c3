use crate::domains::delivery::{Geocoder, MappingError, RouteDistance};
use crate::domains::geo::{distance, Coordinate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Geocoder backed by a fixed address book. Lookups ignore case and
/// surrounding whitespace.
#[derive(Debug, Default)]
pub struct StaticGeocoder {
    addresses: RwLock<HashMap<String, Coordinate>>,
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(self, address: &str, coordinate: Coordinate) -> Self {
        self.insert(address, coordinate);
        self
    }

    pub fn insert(&self, address: &str, coordinate: Coordinate) {
        self.addresses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(normalize(address), coordinate);
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn resolve(&self, address: &str) -> Result<Coordinate, MappingError> {
        self.addresses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&normalize(address))
            .copied()
            .ok_or_else(|| MappingError::NotFound(address.to_string()))
    }

    async fn reverse(&self, coordinate: &Coordinate) -> Result<String, MappingError> {
        let addresses = self.addresses.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        addresses
            .iter()
            .filter_map(|(address, known)| {
                distance(known, coordinate).ok().map(|meters| (address, meters))
            })
            .filter(|(_, meters)| *meters <= 25.0)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(address, _)| address.clone())
            .ok_or_else(|| MappingError::NotFound(coordinate.to_string()))
    }
}

/// Route distance estimate for simulated sessions: great-circle distance
/// scaled by a detour factor.
#[derive(Debug, Clone)]
pub struct StraightLineRouteDistance {
    detour_factor: f64,
}

impl StraightLineRouteDistance {
    pub fn new(detour_factor: f64) -> Self {
        Self { detour_factor }
    }
}

impl Default for StraightLineRouteDistance {
    fn default() -> Self {
        Self::new(1.3)
    }
}

#[async_trait]
impl RouteDistance for StraightLineRouteDistance {
    async fn driving_distance(
        &self,
        origin: &Coordinate,
        destination: &Coordinate,
    ) -> Result<f64, MappingError> {
        distance(origin, destination)
            .map(|meters| meters * self.detour_factor)
            .map_err(|e| MappingError::Unavailable(e.to_string()))
    }
}

/// Route service that is never reachable.
#[derive(Debug, Default, Clone)]
pub struct UnavailableRouteDistance;

#[async_trait]
impl RouteDistance for UnavailableRouteDistance {
    async fn driving_distance(
        &self,
        _origin: &Coordinate,
        _destination: &Coordinate,
    ) -> Result<f64, MappingError> {
        Err(MappingError::Unavailable("no route service configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_addresses_case_insensitively() {
        let times_square = Coordinate::new(40.7580, -73.9855).unwrap();
        let geocoder = StaticGeocoder::new().with_address("Times Square, New York", times_square);

        assert_eq!(geocoder.resolve("  times square, new york ").await.unwrap(), times_square);
        assert!(matches!(
            geocoder.resolve("Atlantis").await,
            Err(MappingError::NotFound(_))
        ));
        assert_eq!(
            geocoder.reverse(&times_square).await.unwrap(),
            "times square, new york"
        );
    }

    #[tokio::test]
    async fn straight_line_route_applies_detour_factor() {
        let a = Coordinate::new(40.7580, -73.9855).unwrap();
        let b = Coordinate::new(40.7128, -74.0060).unwrap();
        let straight = distance(&a, &b).unwrap();
        let route = StraightLineRouteDistance::new(2.0).driving_distance(&a, &b).await.unwrap();
        assert!((route - 2.0 * straight).abs() < 1e-6);
    }
}
