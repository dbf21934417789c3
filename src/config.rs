use crate::domains::delivery::DEFAULT_GEOFENCE_RADIUS_METERS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "TRACKSURE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub geofence: GeofenceConfig,
    pub tracking: TrackingConfig,
    pub storage: StorageConfig,
    pub postgres: PostgresConfig,
    pub kafka: KafkaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    pub radius_meters: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub ingest_channel_capacity: usize,
    pub ingest_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub reporter_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory`, `file` or `postgres`.
    pub backend: String,
    pub position_log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub enabled: bool,
    pub brokers: Vec<String>,
    pub client_id: String,
    pub topics: KafkaTopics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaTopics {
    pub positions: String,
    pub orders: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// When set, domain logs are also written to this file.
    pub file: Option<String>,
    pub buffer_capacity: usize,
}

impl Config {
    /// Layers `path` (optional, any format the `config` crate understands)
    /// under `TRACKSURE__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let layered = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers"),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        let config: Config = layered
            .try_deserialize()
            .context("configuration has an invalid shape")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("invalid TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.geofence.radius_meters.is_finite() || self.geofence.radius_meters <= 0.0 {
            anyhow::bail!(
                "geofence.radius_meters must be positive, got {}",
                self.geofence.radius_meters
            );
        }
        if self.tracking.ingest_channel_capacity == 0 {
            anyhow::bail!("tracking.ingest_channel_capacity must be at least 1");
        }
        if self.tracking.publish_timeout_ms >= self.tracking.ingest_timeout_ms {
            anyhow::bail!(
                "tracking.publish_timeout_ms ({}) must be below tracking.ingest_timeout_ms ({})",
                self.tracking.publish_timeout_ms,
                self.tracking.ingest_timeout_ms
            );
        }
        Ok(())
    }
}

impl TrackingConfig {
    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn reporter_interval(&self) -> Duration {
        Duration::from_millis(self.reporter_interval_ms)
    }
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            radius_meters: DEFAULT_GEOFENCE_RADIUS_METERS,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            ingest_channel_capacity: 256,
            ingest_timeout_ms: 2_000,
            publish_timeout_ms: 250,
            reporter_interval_ms: 1_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            position_log_dir: PathBuf::from("/tmp/tracksure-positions"),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "tracksure".to_string(),
            username: "postgres".to_string(),
            password: "password".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: vec!["localhost:9092".to_string()],
            client_id: "tracksure".to_string(),
            topics: KafkaTopics::default(),
        }
    }
}

impl Default for KafkaTopics {
    fn default() -> Self {
        Self {
            positions: "driver-positions".to_string(),
            orders: "order-events".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            buffer_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.geofence.radius_meters, DEFAULT_GEOFENCE_RADIUS_METERS);
        assert_eq!(config.tracking.ingest_timeout(), Duration::from_secs(2));
        assert_eq!(config.storage.backend, "memory");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [geofence]
            radius_meters = 75.0

            [kafka]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.geofence.radius_meters, 75.0);
        assert!(config.kafka.enabled);
        assert_eq!(config.kafka.topics.positions, "driver-positions");
    }

    #[test]
    fn rejects_non_positive_radius() {
        assert!(Config::from_toml_str("[geofence]\nradius_meters = 0.0").is_err());
    }

    #[test]
    fn rejects_publish_timeout_not_below_ingest_timeout() {
        let err = Config::from_toml_str(
            r#"
            [tracking]
            ingest_timeout_ms = 500
            publish_timeout_ms = 500
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("publish_timeout_ms"));

        assert!(Config::from_toml_str("[tracking]\ningest_timeout_ms = 0").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/tracksure").unwrap();
        assert_eq!(config.postgres.port, 5432);
    }
}
