use crate::config::KafkaConfig;
use crate::domains::tracking::{PositionPublisher, PositionRecorded, PublishError};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

/// Publishes accepted positions to the positions topic, keyed by agent so
/// each agent's positions stay in one partition and keep their order.
pub struct KafkaPositionPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPositionPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, String> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| format!("Failed to create Kafka producer: {}", e))?;

        tracing::info!(
            topic = %config.topics.positions,
            "Kafka position publisher ready; topic must already exist"
        );

        Ok(Self {
            producer,
            topic: config.topics.positions.clone(),
        })
    }

    fn failure(&self, reason: impl Into<String>) -> PublishError {
        PublishError {
            publisher: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PositionPublisher for KafkaPositionPublisher {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn publish(&self, event: &PositionRecorded) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| self.failure(format!("Failed to serialize position: {}", e)))?;
        let key = &event.position.agent_id;

        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);
        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| self.failure(format!("Failed to send position to Kafka: {}", e)))?;
        Ok(())
    }
}
