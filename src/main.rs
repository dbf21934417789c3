use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tracksure::adapters::inbound::{FilePositionLog, InMemoryEventStore};
use tracksure::adapters::outbound::{
    init_buffered_logger, init_file_logger, InMemoryImageStore, InMemoryOrderRepository,
    InMemoryPositionLog, InMemoryProofStore, PostgresTrackingStore, StaticGeocoder,
    StraightLineRouteDistance,
};
use tracksure::application::{
    DeliveryPorts, DeliveryService, OrderDraft, ProofImage, StopDraft, TrackingService,
};
use tracksure::domains::delivery::{
    DeliveryEventActor, GeofenceRegistry, GeofenceState, OrderEventEmitter, OrderRepository,
    ProofStore,
};
use tracksure::domains::geo::{distance, Coordinate};
use tracksure::domains::logger::{DynLogger, TracingLogger};
use tracksure::domains::session::{Role, Session};
use tracksure::domains::tracking::{
    LiveFeedHub, LocationIngestor, PositionLog, SimulatedLocationProvider,
};
use tracksure::Config;

struct Storage {
    positions: Arc<dyn PositionLog>,
    orders: Arc<dyn OrderRepository>,
    proofs: Arc<dyn ProofStore>,
}

async fn storage(config: &Config) -> Result<Storage> {
    match config.storage.backend.as_str() {
        "postgres" => {
            let store = Arc::new(
                PostgresTrackingStore::new(config.postgres.clone())
                    .await
                    .map_err(anyhow::Error::msg)?,
            );
            Ok(Storage {
                positions: store.clone(),
                orders: store.clone(),
                proofs: store,
            })
        }
        "file" => Ok(Storage {
            positions: Arc::new(FilePositionLog::new(config.storage.position_log_dir.clone())),
            orders: Arc::new(InMemoryOrderRepository::new()),
            proofs: Arc::new(InMemoryProofStore::new()),
        }),
        "memory" => Ok(Storage {
            positions: Arc::new(InMemoryPositionLog::new()),
            orders: Arc::new(InMemoryOrderRepository::new()),
            proofs: Arc::new(InMemoryProofStore::new()),
        }),
        other => anyhow::bail!("unknown storage backend '{}'", other),
    }
}

fn domain_logger(config: &Config) -> Result<DynLogger> {
    let bridge = match &config.logging.file {
        Some(path) => init_file_logger(path, "tracksure").map_err(anyhow::Error::msg)?,
        None => TracingLogger::shared("tracksure"),
    };
    Ok(init_buffered_logger(bridge, config.logging.buffer_capacity))
}

#[cfg(feature = "kafka")]
fn with_publishers(ingestor: LocationIngestor, config: &Config) -> Result<LocationIngestor> {
    if !config.kafka.enabled {
        return Ok(ingestor);
    }
    let publisher = tracksure::adapters::outbound::KafkaPositionPublisher::new(&config.kafka)
        .map_err(anyhow::Error::msg)?;
    Ok(ingestor.with_publisher(Arc::new(publisher)))
}

#[cfg(not(feature = "kafka"))]
fn with_publishers(ingestor: LocationIngestor, config: &Config) -> Result<LocationIngestor> {
    if config.kafka.enabled {
        warn!("kafka.enabled is set but the binary was built without the `kafka` feature");
    }
    Ok(ingestor)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Installed explicitly so fast_log can still own the `log` facade.
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing")?;

    info!("Starting TrackSure");

    let config = Config::load("tracksure").context("failed to load configuration")?;
    info!(
        storage = %config.storage.backend,
        radius_meters = config.geofence.radius_meters,
        "Configuration loaded successfully"
    );

    let logger = domain_logger(&config)?;
    let storage = storage(&config).await?;

    let (event_sender, event_receiver) = mpsc::channel(100);
    let event_actor = DeliveryEventActor::new(Arc::new(InMemoryEventStore::new()), event_receiver);
    let projections = event_actor.projections();
    let event_task = tokio::spawn(event_actor.run());

    let registry = Arc::new(GeofenceRegistry::new());
    let ingestor = LocationIngestor::new(storage.positions.clone(), LiveFeedHub::new(), logger.clone())
        .with_publish_timeout(config.tracking.publish_timeout());
    let ingestor = with_publishers(ingestor, &config)?;
    let tracking = TrackingService::start(ingestor, registry.clone(), &config.tracking, logger.clone());

    let pickup = Coordinate::new(40.7128, -74.0060)?;
    let drop_point = Coordinate::new(40.7580, -73.9855)?;
    let geocoder = StaticGeocoder::new()
        .with_address("City Hall, New York", pickup)
        .with_address("Times Square, New York", drop_point);

    let deliveries = DeliveryService::new(
        DeliveryPorts {
            orders: storage.orders.clone(),
            proofs: storage.proofs.clone(),
            images: Arc::new(InMemoryImageStore::new()),
            geocoder: Arc::new(geocoder),
            routes: Arc::new(StraightLineRouteDistance::default()),
        },
        registry,
        OrderEventEmitter::new(event_sender),
        logger.clone(),
    )
    .with_radius(config.geofence.radius_meters);

    let restored = deliveries.restore_gates().await?;
    if restored > 0 {
        info!(restored, "restored geofences of assigned orders");
    }

    let admin = Session::simulated(Role::Admin);
    let driver = Session::simulated(Role::Driver);

    let order = deliveries
        .create_order(
            &admin,
            OrderDraft {
                pickup: StopDraft::address("City Hall, New York"),
                drop: StopDraft::address("Times Square, New York"),
                agent_id: Some(driver.user_id().to_string()),
            },
        )
        .await?;
    info!(
        order_id = %order.id,
        straight_line_m = distance(&order.pickup.coordinate, &order.drop.coordinate)?,
        planned_distance_m = ?order.planned_distance_m,
        "demo order assigned to {}",
        driver.user_id()
    );

    let mut feed = tracking.watch_agent(&admin, driver.user_id())?;
    let observer = tokio::spawn(async move {
        while let Some(position) = feed.next().await {
            info!(agent_id = %position.agent_id, at = %position.coordinate, "live position");
        }
    });

    // Start a few hundred meters south of the drop point.
    let start = Coordinate::new(drop_point.latitude - 0.004, drop_point.longitude)?;
    let interval = config.tracking.reporter_interval();
    tracking
        .start_reporting(&driver, SimulatedLocationProvider::new(start, drop_point, interval))
        .await?;

    let demo = async {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(status) = deliveries.geofence_status(&order.id) else {
                break;
            };
            info!(state = ?status.state, distance_m = ?status.distance_meters, "geofence");
            if status.state != GeofenceState::InRange {
                continue;
            }

            let image = ProofImage::new("doorstep.jpg", b"simulated-jpeg".to_vec());
            match deliveries.confirm(&driver, &order.id, Some(image)).await {
                Ok(proof) => {
                    info!(image_ref = %proof.image_ref, "delivery confirmed");
                    break;
                }
                Err(e) if e.is_denial() || e.is_retryable() => warn!("confirmation not yet possible: {}", e),
                Err(e) => {
                    error!("confirmation failed: {}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = demo => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    if let Some(stats) = tracking.end_agent_session(driver.user_id()).await {
        info!(sent = stats.sent, dropped = stats.dropped, "driver session ended");
    }
    let _ = observer.await;
    tracking.shutdown().await;

    drop(deliveries);
    let _ = event_task.await;
    let dashboard = projections.dashboard().await;
    info!(
        total = dashboard.total_orders,
        delivered = dashboard.delivered_orders,
        planned_km = dashboard.total_planned_distance_km,
        "Shutting down TrackSure"
    );

    Ok(())
}
