use super::events::PositionRecorded;
use super::feed::{FeedError, LiveFeedHub};
use super::ports::{PositionLog, PositionObserver, PositionPublisher, StorageError};
use super::position::{Position, PositionSample};
use crate::domains::geo::{Coordinate, GeoError};
use crate::domains::logger::DynLogger;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error(transparent)]
    InvalidCoordinate(#[from] GeoError),

    #[error("Invalid accuracy {accuracy_m} m for agent {agent_id}")]
    InvalidAccuracy { agent_id: String, accuracy_m: f64 },

    #[error("Stale position for agent {agent_id}: {recorded_at} is not after {last_accepted}")]
    StalePosition {
        agent_id: String,
        recorded_at: DateTime<Utc>,
        last_accepted: DateTime<Utc>,
    },

    #[error("Position log unavailable: {0}")]
    Storage(#[from] StorageError),
}

impl TrackingError {
    /// Whether the same sample may succeed if submitted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackingError::Storage(_))
    }
}

type Watermark = Arc<Mutex<Option<DateTime<Utc>>>>;

/// Validates, orders, persists and publishes incoming position samples.
///
/// Samples of one agent are processed one at a time behind that agent's
/// watermark lock, so the log and the live feed only ever move forward in
/// time. Different agents never contend.
///
/// Once a position is stored, observers run and the live feed is updated
/// before any external publisher is tried. Only storage calls are bounded by
/// the storage timeout; a slow publisher cannot undo an accepted position.
pub struct LocationIngestor {
    log: Arc<dyn PositionLog>,
    hub: LiveFeedHub,
    observers: Vec<Arc<dyn PositionObserver>>,
    publishers: Vec<Arc<dyn PositionPublisher>>,
    watermarks: Mutex<HashMap<String, Watermark>>,
    storage_timeout: Duration,
    publish_timeout: Duration,
    logger: DynLogger,
}

impl LocationIngestor {
    pub fn new(log: Arc<dyn PositionLog>, hub: LiveFeedHub, logger: DynLogger) -> Self {
        Self {
            log,
            hub,
            observers: Vec::new(),
            publishers: Vec::new(),
            watermarks: Mutex::new(HashMap::new()),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            logger,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn PositionPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PositionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn hub(&self) -> &LiveFeedHub {
        &self.hub
    }

    pub async fn ingest(&self, sample: PositionSample) -> Result<Position, TrackingError> {
        let position = Self::validate(sample)?;

        let watermark = self.watermark_for(&position.agent_id).await;
        let mut last_accepted = watermark.lock().await;

        if last_accepted.is_none() {
            *last_accepted = self
                .bounded(self.log.latest(&position.agent_id))
                .await?
                .map(|stored| stored.recorded_at);
        }

        if let Some(last) = *last_accepted {
            if position.recorded_at <= last {
                tracing::debug!(
                    agent_id = %position.agent_id,
                    recorded_at = %position.recorded_at,
                    last_accepted = %last,
                    "dropping stale position"
                );
                return Err(TrackingError::StalePosition {
                    agent_id: position.agent_id,
                    recorded_at: position.recorded_at,
                    last_accepted: last,
                });
            }
        }

        self.bounded(self.log.append(&position)).await?;
        *last_accepted = Some(position.recorded_at);

        for observer in &self.observers {
            observer.observe_position(&position);
        }

        // Publishing stays under the agent lock so external buses see the
        // same order as the log.
        self.publish(&position).await;

        Ok(position)
    }

    /// Forgets the in-memory watermark of an agent whose session ended. The
    /// next sample re-seeds it from the position log.
    pub async fn forget_agent(&self, agent_id: &str) {
        self.watermarks.lock().await.remove(agent_id);
    }

    fn validate(sample: PositionSample) -> Result<Position, TrackingError> {
        let coordinate = Coordinate::new(sample.latitude, sample.longitude)?;

        if let Some(accuracy_m) = sample.accuracy_m {
            if !accuracy_m.is_finite() || accuracy_m < 0.0 {
                return Err(TrackingError::InvalidAccuracy {
                    agent_id: sample.agent_id,
                    accuracy_m,
                });
            }
        }

        Ok(Position {
            agent_id: sample.agent_id,
            coordinate,
            recorded_at: sample.recorded_at.unwrap_or_else(Utc::now),
            accuracy_m: sample.accuracy_m,
        })
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        tokio::time::timeout(self.storage_timeout, operation)
            .await
            .map_err(|_| StorageError::Timeout(self.storage_timeout))?
    }

    async fn watermark_for(&self, agent_id: &str) -> Watermark {
        let mut watermarks = self.watermarks.lock().await;
        watermarks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn publish(&self, position: &Position) {
        match self.hub.publish(position) {
            Ok(_) => {}
            Err(FeedError::Superseded { .. }) => {
                self.logger.warn(&format!(
                    "live feed already holds a newer position for agent {}",
                    position.agent_id
                ));
            }
            Err(e) => self.logger.error(&format!("live feed publish failed: {}", e)),
        }

        if self.publishers.is_empty() {
            return;
        }

        let event = PositionRecorded::new(position.clone());
        for publisher in &self.publishers {
            match tokio::time::timeout(self.publish_timeout, publisher.publish(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.logger.error(&e.to_string()),
                Err(_) => self.logger.warn(&format!(
                    "publisher {} timed out after {:?} for agent {}",
                    publisher.name(),
                    self.publish_timeout,
                    position.agent_id
                )),
            }
        }
    }
}
