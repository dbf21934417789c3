use crate::config::PostgresConfig;
use crate::domains::delivery::{
    DeliveryProof, Order, OrderRepository, OrderStatus, ProofStore, RepositoryError, Stop,
};
use crate::domains::geo::Coordinate;
use crate::domains::tracking::{Position, PositionLog, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Object, Pool, PoolConfig, Runtime};
use tokio_postgres::{NoTls, Row};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS agent_positions (
        id BIGSERIAL PRIMARY KEY,
        agent_id VARCHAR(255) NOT NULL,
        latitude DOUBLE PRECISION NOT NULL,
        longitude DOUBLE PRECISION NOT NULL,
        accuracy_m DOUBLE PRECISION,
        recorded_at TIMESTAMPTZ NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS uq_agent_positions_agent_time
    ON agent_positions(agent_id, recorded_at);

    CREATE TABLE IF NOT EXISTS orders (
        order_id VARCHAR(255) PRIMARY KEY,
        pickup_address TEXT,
        pickup_lat DOUBLE PRECISION NOT NULL,
        pickup_lng DOUBLE PRECISION NOT NULL,
        drop_address TEXT,
        drop_lat DOUBLE PRECISION NOT NULL,
        drop_lng DOUBLE PRECISION NOT NULL,
        assigned_agent_id VARCHAR(255),
        status VARCHAR(32) NOT NULL,
        planned_distance_m DOUBLE PRECISION,
        created_at TIMESTAMPTZ NOT NULL,
        delivered_at TIMESTAMPTZ,
        version BIGINT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_orders_agent ON orders(assigned_agent_id);

    CREATE TABLE IF NOT EXISTS delivery_proofs (
        order_id VARCHAR(255) PRIMARY KEY REFERENCES orders(order_id),
        agent_id VARCHAR(255) NOT NULL,
        captured_lat DOUBLE PRECISION NOT NULL,
        captured_lng DOUBLE PRECISION NOT NULL,
        captured_accuracy_m DOUBLE PRECISION,
        captured_at TIMESTAMPTZ NOT NULL,
        image_ref TEXT NOT NULL,
        delivered_at TIMESTAMPTZ NOT NULL
    );
"#;

const ORDER_COLUMNS: &str = "order_id, pickup_address, pickup_lat, pickup_lng, drop_address, \
     drop_lat, drop_lng, assigned_agent_id, status, planned_distance_m, created_at, \
     delivered_at, version";

/// Position log, order table and proof table on one PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresTrackingStore {
    pool: Pool,
}

fn backend<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> String + '_ {
    move |e| format!("{}: {}", context, e)
}

impl PostgresTrackingStore {
    pub async fn new(config: PostgresConfig) -> Result<Self, String> {
        let mut pg_config = Config::new();
        pg_config.host = Some(config.host);
        pg_config.port = Some(config.port);
        pg_config.dbname = Some(config.database);
        pg_config.user = Some(config.username);
        pg_config.password = Some(config.password);
        pg_config.pool = Some(PoolConfig::new(config.max_connections));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(backend("Failed to create PostgreSQL pool"))?;

        let store = Self::from_pool(pool);
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Wraps an existing pool. The schema is not touched.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> Result<(), String> {
        let client = self.client().await.map_err(|e| e.to_string())?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(backend("Failed to initialize database schema"))?;
        Ok(())
    }

    async fn client(&self) -> Result<Object, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to get database connection: {}", e)))
    }

    async fn order_client(&self) -> Result<Object, RepositoryError> {
        self.client()
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))
    }
}

fn position_from_row(row: &Row) -> Position {
    Position {
        agent_id: row.get("agent_id"),
        coordinate: Coordinate {
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
        },
        recorded_at: row.get("recorded_at"),
        accuracy_m: row.get("accuracy_m"),
    }
}

fn order_from_row(row: &Row) -> Result<Order, RepositoryError> {
    let status: String = row.get("status");
    let status: OrderStatus = status
        .parse()
        .map_err(|e: crate::common::DomainError| RepositoryError::Backend(e.to_string()))?;

    let mut order = Order::empty(row.get::<_, String>("order_id"));
    order.pickup = Stop {
        address: row.get("pickup_address"),
        coordinate: Coordinate {
            latitude: row.get("pickup_lat"),
            longitude: row.get("pickup_lng"),
        },
    };
    order.drop = Stop {
        address: row.get("drop_address"),
        coordinate: Coordinate {
            latitude: row.get("drop_lat"),
            longitude: row.get("drop_lng"),
        },
    };
    order.assigned_agent_id = row.get("assigned_agent_id");
    order.status = status;
    order.planned_distance_m = row.get("planned_distance_m");
    order.created_at = row.get("created_at");
    order.delivered_at = row.get("delivered_at");
    order.version = row.get::<_, i64>("version") as u64;
    Ok(order)
}

#[async_trait]
impl PositionLog for PostgresTrackingStore {
    async fn append(&self, position: &Position) -> Result<(), StorageError> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO agent_positions (agent_id, latitude, longitude, accuracy_m, recorded_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (agent_id, recorded_at) DO NOTHING",
                &[
                    &position.agent_id,
                    &position.coordinate.latitude,
                    &position.coordinate.longitude,
                    &position.accuracy_m,
                    &position.recorded_at,
                ],
            )
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to append position: {}", e)))?;
        Ok(())
    }

    async fn latest(&self, agent_id: &str) -> Result<Option<Position>, StorageError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT agent_id, latitude, longitude, accuracy_m, recorded_at
                 FROM agent_positions
                 WHERE agent_id = $1
                 ORDER BY recorded_at DESC
                 LIMIT 1",
                &[&agent_id],
            )
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to load position: {}", e)))?;
        Ok(row.as_ref().map(position_from_row))
    }

    async fn history(&self, agent_id: &str, limit: usize) -> Result<Vec<Position>, StorageError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT agent_id, latitude, longitude, accuracy_m, recorded_at
                 FROM agent_positions
                 WHERE agent_id = $1
                 ORDER BY recorded_at DESC
                 LIMIT $2",
                &[&agent_id, &(limit as i64)],
            )
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to load positions: {}", e)))?;

        let mut positions: Vec<Position> = rows.iter().map(position_from_row).collect();
        positions.reverse();
        Ok(positions)
    }
}

#[async_trait]
impl OrderRepository for PostgresTrackingStore {
    async fn get(&self, order_id: &str) -> Result<Order, RepositoryError> {
        let client = self.order_client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM orders WHERE order_id = $1", ORDER_COLUMNS),
                &[&order_id],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to load order: {}", e)))?
            .ok_or_else(|| RepositoryError::NotFound(order_id.to_string()))?;
        order_from_row(&row)
    }

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let client = self.order_client().await?;
        let inserted = client
            .execute(
                &format!(
                    "INSERT INTO orders ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                     ON CONFLICT (order_id) DO NOTHING",
                    ORDER_COLUMNS
                ),
                &[
                    &order.id,
                    &order.pickup.address,
                    &order.pickup.coordinate.latitude,
                    &order.pickup.coordinate.longitude,
                    &order.drop.address,
                    &order.drop.coordinate.latitude,
                    &order.drop.coordinate.longitude,
                    &order.assigned_agent_id,
                    &order.status.as_str(),
                    &order.planned_distance_m,
                    &order.created_at,
                    &order.delivered_at,
                    &(order.version as i64),
                ],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to insert order: {}", e)))?;

        if inserted == 0 {
            return Err(RepositoryError::conflict(&order.id, "order already exists"));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let previous = match status {
            OrderStatus::Created => {
                return Err(RepositoryError::conflict(order_id, "cannot move back to created"))
            }
            OrderStatus::Assigned => OrderStatus::Created,
            OrderStatus::Delivered => OrderStatus::Assigned,
        };
        let delivered_at: Option<DateTime<Utc>> =
            (status == OrderStatus::Delivered).then(Utc::now);

        let client = self.order_client().await?;
        let row = client
            .query_opt(
                "UPDATE orders
                 SET status = $1, version = version + 1, delivered_at = COALESCE($2, delivered_at)
                 WHERE order_id = $3 AND version = $4 AND status = $5
                 RETURNING version",
                &[
                    &status.as_str(),
                    &delivered_at,
                    &order_id,
                    &(expected_version as i64),
                    &previous.as_str(),
                ],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to update order: {}", e)))?;

        match row {
            Some(row) => Ok(row.get::<_, i64>(0) as u64),
            None => {
                let current = OrderRepository::get(self, order_id).await?;
                Err(RepositoryError::conflict(
                    order_id,
                    format!(
                        "expected version {} in {}, stored version {} in {}",
                        expected_version, previous, current.version, current.status
                    ),
                ))
            }
        }
    }

    async fn assign_agent(
        &self,
        order_id: &str,
        agent_id: &str,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let client = self.order_client().await?;
        let row = client
            .query_opt(
                "UPDATE orders
                 SET assigned_agent_id = $1, status = $2, version = version + 1
                 WHERE order_id = $3 AND version = $4 AND status = $5
                 RETURNING version",
                &[
                    &agent_id,
                    &OrderStatus::Assigned.as_str(),
                    &order_id,
                    &(expected_version as i64),
                    &OrderStatus::Created.as_str(),
                ],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to assign order: {}", e)))?;

        match row {
            Some(row) => Ok(row.get::<_, i64>(0) as u64),
            None => {
                let current = OrderRepository::get(self, order_id).await?;
                Err(RepositoryError::conflict(
                    order_id,
                    format!(
                        "expected version {}, stored version {} in {}",
                        expected_version, current.version, current.status
                    ),
                ))
            }
        }
    }

    async fn list(&self) -> Result<Vec<Order>, RepositoryError> {
        let client = self.order_client().await?;
        let rows = client
            .query(
                &format!("SELECT {} FROM orders ORDER BY created_at", ORDER_COLUMNS),
                &[],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to list orders: {}", e)))?;
        rows.iter().map(order_from_row).collect()
    }

    async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<Order>, RepositoryError> {
        let client = self.order_client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM orders WHERE assigned_agent_id = $1 ORDER BY created_at",
                    ORDER_COLUMNS
                ),
                &[&agent_id],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to list orders: {}", e)))?;
        rows.iter().map(order_from_row).collect()
    }
}

#[async_trait]
impl ProofStore for PostgresTrackingStore {
    async fn create(&self, proof: &DeliveryProof) -> Result<DeliveryProof, RepositoryError> {
        let client = self.order_client().await?;
        client
            .execute(
                "INSERT INTO delivery_proofs (order_id, agent_id, captured_lat, captured_lng,
                     captured_accuracy_m, captured_at, image_ref, delivered_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (order_id) DO NOTHING",
                &[
                    &proof.order_id,
                    &proof.agent_id,
                    &proof.captured_position.coordinate.latitude,
                    &proof.captured_position.coordinate.longitude,
                    &proof.captured_position.accuracy_m,
                    &proof.captured_position.recorded_at,
                    &proof.image_ref,
                    &proof.delivered_at,
                ],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to save proof: {}", e)))?;
        drop(client);

        ProofStore::get(self, &proof.order_id)
            .await?
            .ok_or_else(|| RepositoryError::Backend(format!("Proof for {} vanished", proof.order_id)))
    }

    async fn get(&self, order_id: &str) -> Result<Option<DeliveryProof>, RepositoryError> {
        let client = self.order_client().await?;
        let row = client
            .query_opt(
                "SELECT order_id, agent_id, captured_lat, captured_lng, captured_accuracy_m,
                     captured_at, image_ref, delivered_at
                 FROM delivery_proofs WHERE order_id = $1",
                &[&order_id],
            )
            .await
            .map_err(|e| RepositoryError::Backend(format!("Failed to load proof: {}", e)))?;

        Ok(row.map(|row| {
            let agent_id: String = row.get("agent_id");
            DeliveryProof {
                order_id: row.get("order_id"),
                agent_id: agent_id.clone(),
                captured_position: Position {
                    agent_id,
                    coordinate: Coordinate {
                        latitude: row.get("captured_lat"),
                        longitude: row.get("captured_lng"),
                    },
                    recorded_at: row.get("captured_at"),
                    accuracy_m: row.get("captured_accuracy_m"),
                },
                image_ref: row.get("image_ref"),
                delivered_at: row.get("delivered_at"),
            }
        }))
    }
}
