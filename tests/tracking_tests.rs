use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_pending, assert_ready_eq, task};
use tracksure::adapters::outbound::{init_noop_logger, InMemoryPositionLog};
use tracksure::application::TrackingService;
use tracksure::config::TrackingConfig;
use tracksure::domains::delivery::{GeofenceGate, GeofenceRegistry, GeofenceState};
use tracksure::domains::geo::Coordinate;
use tracksure::domains::logger::DomainLogger;
use tracksure::domains::session::{Role, Session};
use tracksure::domains::tracking::*;

struct CaptureLogger {
    messages: Mutex<Vec<String>>,
}

impl CaptureLogger {
    fn new() -> Arc<Self> {
        Arc::new(Self { messages: Mutex::new(Vec::new()) })
    }

    fn contains(&self, needle: &str) -> bool {
        self.messages.lock().unwrap().iter().any(|m| m.contains(needle))
    }
}

impl DomainLogger for CaptureLogger {
    fn info(&self, msg: &str) { self.messages.lock().unwrap().push(format!("INFO:{}", msg)); }
    fn warn(&self, msg: &str) { self.messages.lock().unwrap().push(format!("WARN:{}", msg)); }
    fn error(&self, msg: &str) { self.messages.lock().unwrap().push(format!("ERR:{}", msg)); }
}

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + ChronoDuration::seconds(seconds)
}

fn sample(agent: &str, seconds: i64) -> PositionSample {
    PositionSample::new(agent, 40.7570 + seconds as f64 * 1e-5, -73.9855).at(t(seconds))
}

fn ingestor(log: Arc<InMemoryPositionLog>) -> LocationIngestor {
    LocationIngestor::new(log, LiveFeedHub::new(), init_noop_logger())
}

#[tokio::test]
async fn test_stale_sample_is_rejected_and_latest_is_kept() {
    let log = Arc::new(InMemoryPositionLog::new());
    let ingestor = ingestor(log.clone());

    ingestor.ingest(sample("driver-1", 10)).await.unwrap();

    for seconds in [10, 5] {
        let err = ingestor.ingest(sample("driver-1", seconds)).await.unwrap_err();
        assert!(matches!(err, TrackingError::StalePosition { .. }));
        assert!(!err.is_retryable());
    }

    assert_eq!(ingestor.hub().latest("driver-1").unwrap().recorded_at, t(10));
    assert_eq!(log.len("driver-1").await, 1);
}

#[tokio::test]
async fn test_invalid_samples_are_rejected_before_storage() {
    let log = Arc::new(InMemoryPositionLog::new());
    let ingestor = ingestor(log.clone());

    let err = ingestor
        .ingest(PositionSample::new("driver-1", 91.0, 0.0).at(t(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::InvalidCoordinate(_)));

    let err = ingestor
        .ingest(PositionSample::new("driver-1", f64::NAN, 0.0).at(t(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::InvalidCoordinate(_)));

    let err = ingestor
        .ingest(sample("driver-1", 3).with_accuracy(-1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::InvalidAccuracy { .. }));

    assert_eq!(log.len("driver-1").await, 0);
    assert!(ingestor.hub().latest("driver-1").is_none());
}

#[tokio::test]
async fn test_watermark_is_seeded_from_the_log() {
    let log = Arc::new(InMemoryPositionLog::new());
    log.append(&Position::new("driver-1", 40.0, -74.0, t(100)).unwrap())
        .await
        .unwrap();

    let ingestor = ingestor(log.clone());
    let err = ingestor.ingest(sample("driver-1", 50)).await.unwrap_err();
    assert!(matches!(err, TrackingError::StalePosition { .. }));

    ingestor.ingest(sample("driver-1", 101)).await.unwrap();
    ingestor.forget_agent("driver-1").await;
    assert!(ingestor.ingest(sample("driver-1", 101)).await.is_err());
}

#[tokio::test]
async fn test_agents_are_ordered_independently() {
    let ingestor = ingestor(Arc::new(InMemoryPositionLog::new()));
    ingestor.ingest(sample("driver-1", 10)).await.unwrap();
    ingestor.ingest(sample("driver-2", 1)).await.unwrap();
    assert_eq!(ingestor.hub().latest("driver-2").unwrap().recorded_at, t(1));
}

#[tokio::test]
async fn test_subscription_yields_snapshot_first() {
    let hub = LiveFeedHub::new();
    let first = Position::new("driver-1", 40.0, -74.0, t(1)).unwrap();
    hub.publish(&first).unwrap();

    let mut subscription = hub.subscribe("driver-1", "admin").unwrap();
    assert_eq!(subscription.next().await, Some(first));

    let mut next = task::spawn(subscription.next());
    assert_pending!(next.poll());

    let second = Position::new("driver-1", 40.001, -74.0, t(2)).unwrap();
    hub.publish(&second).unwrap();
    assert!(next.is_woken());
    assert_ready_eq!(next.poll(), Some(second));
}

#[tokio::test]
async fn test_subscription_without_history_waits_for_first_position() {
    let hub = LiveFeedHub::new();
    let mut subscription = hub.subscribe("driver-1", "admin").unwrap();

    let mut next = task::spawn(subscription.next());
    assert_pending!(next.poll());

    let position = Position::new("driver-1", 40.0, -74.0, t(1)).unwrap();
    hub.publish(&position).unwrap();
    assert_ready_eq!(next.poll(), Some(position));
}

#[tokio::test]
async fn test_idle_subscriber_only_sees_newest_value() {
    let hub = LiveFeedHub::new();
    let mut idle = hub.subscribe("driver-1", "idle").unwrap();

    for i in 0..1_000 {
        hub.publish(&Position::new("driver-1", 40.0, -74.0, t(i)).unwrap()).unwrap();
    }

    let newest = idle.next().await.unwrap();
    assert_eq!(newest.recorded_at, t(999));

    let mut next = task::spawn(idle.next());
    assert_pending!(next.poll());
}

#[tokio::test]
async fn test_slow_subscriber_does_not_hold_back_others() {
    let hub = LiveFeedHub::new();
    let mut fast = hub.subscribe("driver-1", "fast").unwrap();
    let _slow = hub.subscribe("driver-1", "slow").unwrap();

    for i in 0..3 {
        let position = Position::new("driver-1", 40.0, -74.0, t(i)).unwrap();
        assert_eq!(hub.publish(&position).unwrap(), 2);
        assert_eq!(fast.next().await.unwrap().recorded_at, t(i));
    }
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_ends_stream() {
    let hub = LiveFeedHub::new();
    let mut subscription = hub.subscribe("driver-1", "admin").unwrap();

    hub.unsubscribe("driver-1", "admin");
    hub.unsubscribe("driver-1", "admin");
    hub.unsubscribe("driver-unknown", "admin");

    assert_eq!(subscription.next().await, None);
    assert_eq!(hub.subscriber_count("driver-1"), 0);
}

#[tokio::test]
async fn test_closing_an_agent_ends_its_streams() {
    let hub = LiveFeedHub::new();
    let mut subscription = hub.subscribe("driver-1", "admin").unwrap();
    let mut other = hub.subscribe("driver-2", "admin").unwrap();

    hub.close_agent("driver-1");
    assert_eq!(subscription.next().await, None);
    hub.unsubscribe("driver-1", "admin");

    let position = Position::new("driver-2", 40.0, -74.0, t(1)).unwrap();
    hub.publish(&position).unwrap();
    assert_eq!(other.next().await, Some(position));
}

#[tokio::test]
async fn test_replaced_subscription_stream_ends() {
    let hub = LiveFeedHub::new();
    let mut first = hub.subscribe("driver-1", "admin").unwrap();
    let _second = hub.subscribe("driver-1", "admin").unwrap();
    assert_eq!(first.next().await, None);
}

struct SlowPublisher {
    calls: AtomicUsize,
}

#[async_trait]
impl PositionPublisher for SlowPublisher {
    fn name(&self) -> &str {
        "slow"
    }

    async fn publish(&self, _event: &PositionRecorded) -> Result<(), PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

struct FailingPublisher;

#[async_trait]
impl PositionPublisher for FailingPublisher {
    fn name(&self) -> &str {
        "failing"
    }

    async fn publish(&self, _event: &PositionRecorded) -> Result<(), PublishError> {
        Err(PublishError {
            publisher: "failing".to_string(),
            reason: "broker down".to_string(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_publisher_faults_never_fail_ingestion() {
    let logger = CaptureLogger::new();
    let slow = Arc::new(SlowPublisher { calls: AtomicUsize::new(0) });
    let ingestor = LocationIngestor::new(
        Arc::new(InMemoryPositionLog::new()),
        LiveFeedHub::new(),
        logger.clone(),
    )
    .with_publisher(slow.clone())
    .with_publisher(Arc::new(FailingPublisher))
    .with_publish_timeout(Duration::from_millis(100));

    let position = ingestor.ingest(sample("driver-1", 1)).await.unwrap();

    assert_eq!(ingestor.hub().latest("driver-1"), Some(position));
    assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    assert!(logger.contains("WARN:publisher slow timed out"));
    assert!(logger.contains("ERR:Publisher failing failed: broker down"));
}

struct ScriptedProvider {
    fixes: mpsc::Receiver<LocationFix>,
}

#[async_trait]
impl LocationProvider for ScriptedProvider {
    async fn next_fix(&mut self) -> Option<LocationFix> {
        self.fixes.recv().await
    }
}

fn fix(seconds: i64) -> LocationFix {
    LocationFix {
        latitude: 40.7570,
        longitude: -73.9855,
        accuracy_m: Some(5.0),
        recorded_at: Some(t(seconds)),
    }
}

#[tokio::test]
async fn test_reporter_stops_cleanly() {
    let (fix_tx, fix_rx) = mpsc::channel(8);
    let (sample_tx, mut sample_rx) = mpsc::channel(8);
    let handle = spawn_reporter("driver-1", ScriptedProvider { fixes: fix_rx }, sample_tx);

    fix_tx.send(fix(1)).await.unwrap();
    let forwarded = sample_rx.recv().await.unwrap();
    assert_eq!(forwarded.agent_id, "driver-1");
    assert_eq!(forwarded.recorded_at, Some(t(1)));

    let stats = handle.stop().await;
    assert_eq!(stats, ReporterStats { sent: 1, dropped: 0 });

    // Fixes after stop go nowhere and the sample channel closes.
    let _ = fix_tx.send(fix(2)).await;
    assert!(sample_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_reporter_drops_fixes_when_ingest_is_backed_up() {
    let (fix_tx, fix_rx) = mpsc::channel(8);
    let (sample_tx, mut sample_rx) = mpsc::channel(1);
    let handle = spawn_reporter("driver-1", ScriptedProvider { fixes: fix_rx }, sample_tx);

    for seconds in 1..=3 {
        fix_tx.send(fix(seconds)).await.unwrap();
    }
    drop(fix_tx);

    while !handle.is_finished() {
        tokio::task::yield_now().await;
    }
    let stats = handle.stop().await;
    assert_eq!(stats, ReporterStats { sent: 1, dropped: 2 });
    assert_eq!(sample_rx.recv().await.unwrap().recorded_at, Some(t(1)));
}

/// Position log whose appends take a fixed time.
struct SlowPositionLog {
    inner: InMemoryPositionLog,
    append_delay: Duration,
}

#[async_trait]
impl PositionLog for SlowPositionLog {
    async fn append(&self, position: &Position) -> Result<(), StorageError> {
        tokio::time::sleep(self.append_delay).await;
        self.inner.append(position).await
    }

    async fn latest(&self, agent_id: &str) -> Result<Option<Position>, StorageError> {
        self.inner.latest(agent_id).await
    }

    async fn history(&self, agent_id: &str, limit: usize) -> Result<Vec<Position>, StorageError> {
        self.inner.history(agent_id, limit).await
    }
}

fn slow_log(append_delay: Duration) -> Arc<SlowPositionLog> {
    Arc::new(SlowPositionLog {
        inner: InMemoryPositionLog::new(),
        append_delay,
    })
}

fn tracking_service(registry: Arc<GeofenceRegistry>) -> TrackingService {
    let ingestor = LocationIngestor::new(
        Arc::new(InMemoryPositionLog::new()),
        LiveFeedHub::new(),
        init_noop_logger(),
    );
    TrackingService::start(ingestor, registry, &TrackingConfig::default(), init_noop_logger())
}

#[tokio::test]
async fn test_accepted_positions_drive_geofence_gates() {
    let registry = Arc::new(GeofenceRegistry::new());
    let drop_point = Coordinate::new(40.7580, -73.9855).unwrap();
    registry.register(GeofenceGate::new("order-1", "driver-1", drop_point));
    let service = tracking_service(registry.clone());

    service
        .ingest(PositionSample::new("driver-1", 40.7500, -73.9855).at(t(1)))
        .await
        .unwrap();
    assert_eq!(registry.status("order-1").unwrap().state, GeofenceState::OutOfRange);

    service
        .ingest(PositionSample::new("driver-1", 40.75802, -73.98551).at(t(2)))
        .await
        .unwrap();
    let status = registry.status("order-1").unwrap();
    assert_eq!(status.state, GeofenceState::InRange);
    assert!(status.distance_meters.unwrap() < 5.0);
    assert_eq!(status.last_fix_at, Some(t(2)));

    // A stale sample never reaches the gate.
    assert!(service
        .ingest(PositionSample::new("driver-1", 40.7500, -73.9855).at(t(1)))
        .await
        .is_err());
    assert_eq!(registry.status("order-1").unwrap().state, GeofenceState::InRange);

    service.shutdown().await;
}

#[tokio::test]
async fn test_reporter_feeds_live_observers_until_session_ends() {
    let service = tracking_service(Arc::new(GeofenceRegistry::new()));
    let admin = Session::simulated(Role::Admin);
    let driver = Session::simulated(Role::Driver);
    let agent_id = driver.user_id().to_string();

    assert!(service.watch_agent(&driver, &agent_id).is_err());
    let mut feed = service.watch_agent(&admin, &agent_id).unwrap();

    let (fix_tx, fix_rx) = mpsc::channel(8);
    assert!(service
        .start_reporting(&admin, ScriptedProvider { fixes: mpsc::channel(1).1 })
        .await
        .is_err());
    service
        .start_reporting(&driver, ScriptedProvider { fixes: fix_rx })
        .await
        .unwrap();
    assert!(service.is_reporting(&agent_id).await);

    fix_tx.send(fix(1)).await.unwrap();
    let observed = feed.next().await.unwrap();
    assert_eq!(observed.agent_id, agent_id);
    assert_eq!(observed.recorded_at, t(1));

    let stats = service.end_agent_session(&agent_id).await.unwrap();
    assert_eq!(stats.sent, 1);
    assert!(!service.is_reporting(&agent_id).await);
    assert_eq!(feed.next().await, None);

    // Ending twice is harmless.
    assert!(service.end_agent_session(&agent_id).await.is_none());
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_but_accepted_sample_still_reaches_the_gate() {
    let config = TrackingConfig::default();
    let registry = Arc::new(GeofenceRegistry::new());
    let drop_point = Coordinate::new(40.7580, -73.9855).unwrap();
    registry.register(GeofenceGate::new("order-1", "driver-1", drop_point));

    // Storage plus the publisher's timeout together outlast the ingest timeout.
    let logger = CaptureLogger::new();
    let ingestor = LocationIngestor::new(
        slow_log(Duration::from_millis(1_900)),
        LiveFeedHub::new(),
        logger.clone(),
    )
    .with_publisher(Arc::new(SlowPublisher { calls: AtomicUsize::new(0) }))
    .with_publish_timeout(config.publish_timeout());
    let service = TrackingService::start(ingestor, registry.clone(), &config, logger.clone());

    service
        .sample_sender()
        .send(PositionSample::new("driver-1", 40.7580, -73.9855).at(t(1)))
        .await
        .unwrap();

    for _ in 0..100 {
        if logger.contains("WARN:publisher slow timed out") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(logger.contains("WARN:publisher slow timed out"));
    assert!(!logger.contains("dropped sample"));
    assert_eq!(service.latest("driver-1").map(|p| p.recorded_at), Some(t(1)));
    assert_eq!(registry.status("order-1").unwrap().state, GeofenceState::InRange);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_storage_timeout_rejects_sample_before_any_effect() {
    let registry = Arc::new(GeofenceRegistry::new());
    let drop_point = Coordinate::new(40.7580, -73.9855).unwrap();
    registry.register(GeofenceGate::new("order-1", "driver-1", drop_point));

    let ingestor = LocationIngestor::new(
        slow_log(Duration::from_secs(5)),
        LiveFeedHub::new(),
        init_noop_logger(),
    );
    let service = TrackingService::start(
        ingestor,
        registry.clone(),
        &TrackingConfig::default(),
        init_noop_logger(),
    );

    let err = service
        .ingest(PositionSample::new("driver-1", 40.7580, -73.9855).at(t(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::Storage(StorageError::Timeout(_))));
    assert!(err.is_retryable());

    assert_eq!(service.latest("driver-1"), None);
    assert_eq!(registry.status("order-1").unwrap().state, GeofenceState::OutOfRange);

    service.shutdown().await;
}

#[tokio::test]
async fn test_repeated_append_is_stored_once() {
    let log = Arc::new(InMemoryPositionLog::new());
    let position = Position::new("driver-1", 40.7580, -73.9855, t(1)).unwrap();

    log.append(&position).await.unwrap();
    log.append(&position).await.unwrap();
    assert_eq!(log.len("driver-1").await, 1);

    // The ingestor seeds from the stored entry and refuses the repeat.
    let ingestor = ingestor(log.clone());
    let err = ingestor.ingest(sample("driver-1", 1)).await.unwrap_err();
    assert!(matches!(err, TrackingError::StalePosition { .. }));
    assert_eq!(log.len("driver-1").await, 1);
}
