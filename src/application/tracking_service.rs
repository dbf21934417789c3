use crate::config::TrackingConfig;
use crate::domains::delivery::GeofenceRegistry;
use crate::domains::logger::DynLogger;
use crate::domains::session::{Role, Session, SessionError};
use crate::domains::tracking::{
    spawn_reporter, FeedError, LocationIngestor, LocationProvider, Position, PositionSample,
    ReporterHandle, ReporterStats, Subscription, TrackingError,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum TrackingServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Drives the ingestor from the sample channel. Geofence gates are
/// evaluated inside the ingestor as soon as a position is stored.
#[derive(Clone)]
struct IngestPipeline {
    ingestor: Arc<LocationIngestor>,
    registry: Arc<GeofenceRegistry>,
    logger: DynLogger,
}

impl IngestPipeline {
    async fn run(self, mut samples: mpsc::Receiver<PositionSample>) {
        while let Some(sample) = samples.recv().await {
            let agent_id = sample.agent_id.clone();
            match self.ingestor.ingest(sample).await {
                Ok(_) => {}
                Err(TrackingError::StalePosition { .. }) => {}
                // The reporter's next tick carries a fresher fix.
                Err(e) => self.logger.warn(&format!(
                    "dropped sample from agent {}: {}",
                    agent_id, e
                )),
            }
        }
        tracing::debug!("ingest loop stopped");
    }
}

/// Entry point for everything position related: device reporters feed the
/// ingest loop, observers attach to the live feed.
pub struct TrackingService {
    pipeline: IngestPipeline,
    samples: mpsc::Sender<PositionSample>,
    ingest_loop: JoinHandle<()>,
    reporters: Mutex<HashMap<String, ReporterHandle>>,
}

impl TrackingService {
    /// Spawns the ingest loop. Must be called inside a Tokio runtime.
    ///
    /// The registry is attached to the ingestor as an observer and storage
    /// calls are bounded by `tracking.ingest_timeout_ms`.
    pub fn start(
        ingestor: LocationIngestor,
        registry: Arc<GeofenceRegistry>,
        config: &TrackingConfig,
        logger: DynLogger,
    ) -> Self {
        let ingestor = ingestor
            .with_observer(registry.clone())
            .with_storage_timeout(config.ingest_timeout());
        let pipeline = IngestPipeline {
            ingestor: Arc::new(ingestor),
            registry,
            logger,
        };
        let (samples, receiver) = mpsc::channel(config.ingest_channel_capacity.max(1));
        let ingest_loop = tokio::spawn(pipeline.clone().run(receiver));

        Self {
            pipeline,
            samples,
            ingest_loop,
            reporters: Mutex::new(HashMap::new()),
        }
    }

    /// Ingests one sample and evaluates the agent's gates before returning.
    pub async fn ingest(&self, sample: PositionSample) -> Result<Position, TrackingError> {
        self.pipeline.ingestor.ingest(sample).await
    }

    /// Sender into the ingest loop, for callers that bring their own reporter.
    pub fn sample_sender(&self) -> mpsc::Sender<PositionSample> {
        self.samples.clone()
    }

    /// Starts reporting the driver's device fixes. A reporter already running
    /// for the same driver is stopped first.
    pub async fn start_reporting<P: LocationProvider>(
        &self,
        session: &Session,
        provider: P,
    ) -> Result<(), TrackingServiceError> {
        let identity = session.require(Role::Driver)?;
        self.start_reporter(&identity.user_id, provider).await;
        Ok(())
    }

    pub async fn start_reporter<P: LocationProvider>(&self, agent_id: &str, provider: P) {
        let handle = spawn_reporter(agent_id, provider, self.samples.clone());
        let previous = self
            .reporters
            .lock()
            .await
            .insert(agent_id.to_string(), handle);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    pub async fn is_reporting(&self, agent_id: &str) -> bool {
        self.reporters
            .lock()
            .await
            .get(agent_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Ends an agent's session: its reporter stops, every stream on its
    /// channel terminates and its watermark is forgotten. Returns the
    /// reporter's counters if one was running.
    pub async fn end_agent_session(&self, agent_id: &str) -> Option<ReporterStats> {
        let handle = self.reporters.lock().await.remove(agent_id);
        let stats = match handle {
            Some(handle) => Some(handle.stop().await),
            None => None,
        };

        let hub = self.pipeline.ingestor.hub();
        hub.close_agent(agent_id);
        self.pipeline.ingestor.forget_agent(agent_id).await;
        self.pipeline
            .logger
            .info(&format!("tracking session ended for agent {}", agent_id));
        stats
    }

    /// Attaches an admin observer to an agent's live feed.
    pub fn watch_agent(
        &self,
        session: &Session,
        agent_id: &str,
    ) -> Result<Subscription, TrackingServiceError> {
        let identity = session.require(Role::Admin)?;
        Ok(self.subscribe(agent_id, &identity.user_id)?)
    }

    pub fn subscribe(&self, agent_id: &str, observer_id: &str) -> Result<Subscription, FeedError> {
        self.pipeline.ingestor.hub().subscribe(agent_id, observer_id)
    }

    pub fn unsubscribe(&self, agent_id: &str, observer_id: &str) {
        self.pipeline.ingestor.hub().unsubscribe(agent_id, observer_id);
    }

    pub fn latest(&self, agent_id: &str) -> Option<Position> {
        self.pipeline.ingestor.hub().latest(agent_id)
    }

    pub fn registry(&self) -> &Arc<GeofenceRegistry> {
        &self.pipeline.registry
    }

    /// Stops every reporter, drains the ingest loop and closes the feed.
    /// Waits for senders handed out by [`Self::sample_sender`] to drop.
    pub async fn shutdown(self) {
        let reporters: Vec<ReporterHandle> = self
            .reporters
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in reporters {
            handle.stop().await;
        }

        drop(self.samples);
        if let Err(e) = self.ingest_loop.await {
            tracing::error!("ingest loop failed: {}", e);
        }
        self.pipeline.ingestor.hub().shutdown();
    }
}
