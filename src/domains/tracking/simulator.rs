use super::reporter::{LocationFix, LocationProvider};
use crate::domains::geo::{distance, Coordinate};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Device stand-in for simulated sessions: walks from `start` towards
/// `target` a fixed step per tick, with random jitter on every fix.
pub struct SimulatedLocationProvider {
    current: Coordinate,
    target: Coordinate,
    step_m: f64,
    jitter_m: f64,
    interval: tokio::time::Interval,
    remaining_fixes: Option<usize>,
    rng: StdRng,
}

impl SimulatedLocationProvider {
    pub fn new(start: Coordinate, target: Coordinate, period: Duration) -> Self {
        Self {
            current: start,
            target,
            step_m: 40.0,
            jitter_m: 3.0,
            interval: tokio::time::interval(period),
            remaining_fixes: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_step(mut self, step_m: f64) -> Self {
        self.step_m = step_m;
        self
    }

    pub fn with_jitter(mut self, jitter_m: f64) -> Self {
        self.jitter_m = jitter_m;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn limited_to(mut self, fixes: usize) -> Self {
        self.remaining_fixes = Some(fixes);
        self
    }

    fn advance(&mut self) {
        let remaining = distance(&self.current, &self.target).unwrap_or(0.0);
        if remaining <= f64::EPSILON {
            return;
        }
        let fraction = (self.step_m / remaining).min(1.0);
        self.current = Coordinate {
            latitude: self.current.latitude + (self.target.latitude - self.current.latitude) * fraction,
            longitude: self.current.longitude + (self.target.longitude - self.current.longitude) * fraction,
        };
    }

    fn jittered(&mut self) -> (f64, f64) {
        if self.jitter_m <= 0.0 {
            return (self.current.latitude, self.current.longitude);
        }
        let north = self.rng.gen_range(-self.jitter_m..=self.jitter_m);
        let east = self.rng.gen_range(-self.jitter_m..=self.jitter_m);
        let meters_per_degree_lng = METERS_PER_DEGREE_LAT * self.current.latitude.to_radians().cos().max(1e-6);
        let latitude = (self.current.latitude + north / METERS_PER_DEGREE_LAT).clamp(-90.0, 90.0);
        let longitude = (self.current.longitude + east / meters_per_degree_lng).clamp(-180.0, 180.0);
        (latitude, longitude)
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocationProvider {
    async fn next_fix(&mut self) -> Option<LocationFix> {
        if let Some(remaining) = self.remaining_fixes.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        self.interval.tick().await;
        self.advance();
        let (latitude, longitude) = self.jittered();

        Some(LocationFix {
            latitude,
            longitude,
            accuracy_m: Some(self.jitter_m.max(1.0)),
            recorded_at: Some(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn walks_to_target_and_stops() {
        let start = Coordinate::new(40.7570, -73.9860).unwrap();
        let target = Coordinate::new(40.7580, -73.9855).unwrap();
        let mut provider = SimulatedLocationProvider::new(start, target, Duration::from_secs(1))
            .with_step(50.0)
            .with_jitter(0.0)
            .limited_to(10);

        let mut last = None;
        while let Some(fix) = provider.next_fix().await {
            last = Some(fix);
        }

        let last = last.unwrap();
        let at = Coordinate::new(last.latitude, last.longitude).unwrap();
        assert!(distance(&at, &target).unwrap() < 1.0);
    }
}
