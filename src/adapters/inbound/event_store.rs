use crate::common::{EventEnvelope, EventStore, EventStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory event store for tests and the demo binary.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<String, Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one type across all aggregates, oldest first.
    pub async fn events_of_type(
        &self,
        event_type: &str,
        from_timestamp: Option<DateTime<Utc>>,
    ) -> Vec<EventEnvelope> {
        let store = self.events.read().await;

        let mut filtered: Vec<EventEnvelope> = store
            .values()
            .flatten()
            .filter(|event| event.event_type == event_type)
            .filter(|event| from_timestamp.map_or(true, |from| event.occurred_at >= from))
            .cloned()
            .collect();

        filtered.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        filtered
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_events(
        &self,
        aggregate_id: &str,
        expected_version: u64,
        events: Vec<EventEnvelope>,
    ) -> Result<(), EventStoreError> {
        let mut store = self.events.write().await;
        let stream = store.entry(aggregate_id.to_string()).or_default();

        let actual = stream.len() as u64;
        if actual != expected_version {
            return Err(EventStoreError::VersionMismatch {
                aggregate_id: aggregate_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        stream.extend(events);
        Ok(())
    }

    async fn load_events(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let store = self.events.read().await;
        Ok(store
            .get(aggregate_id)
            .map(|events| events.iter().skip(from_version as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn stream_version(&self, aggregate_id: &str) -> Result<u64, EventStoreError> {
        Ok(self
            .events
            .read()
            .await
            .get(aggregate_id)
            .map_or(0, |events| events.len() as u64))
    }
}
