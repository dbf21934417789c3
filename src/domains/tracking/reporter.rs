use super::position::PositionSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A fix delivered by a device location provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl LocationFix {
    pub fn into_sample(self, agent_id: &str) -> PositionSample {
        PositionSample {
            agent_id: agent_id.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            recorded_at: self.recorded_at,
            accuracy_m: self.accuracy_m,
        }
    }
}

/// Source of device fixes. Cadence (minimum interval, distance debounce) is
/// the provider's business, not the reporter's.
#[async_trait]
pub trait LocationProvider: Send + 'static {
    /// Waits for the next fix; `None` once the provider has nothing more.
    async fn next_fix(&mut self) -> Option<LocationFix>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub sent: u64,
    pub dropped: u64,
}

/// Running reporter task for one agent device.
pub struct ReporterHandle {
    agent_id: String,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<ReporterStats>,
}

impl ReporterHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the task to stop and waits for it. Once this returns the task
    /// sends nothing more.
    pub async fn stop(self) -> ReporterStats {
        let _ = self.stop_tx.send(true);
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(agent_id = %self.agent_id, "position reporter task failed: {}", e);
                ReporterStats::default()
            }
        }
    }
}

/// Spawns the background task that forwards an agent's fixes into the
/// ingest channel.
///
/// The task never waits on the channel: when it is full the fix is dropped
/// and the provider's next tick supersedes it.
pub fn spawn_reporter<P: LocationProvider>(
    agent_id: impl Into<String>,
    mut provider: P,
    samples: mpsc::Sender<PositionSample>,
) -> ReporterHandle {
    let agent_id = agent_id.into();
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let task_agent = agent_id.clone();

    let join = tokio::spawn(async move {
        let mut stats = ReporterStats::default();
        tracing::info!(agent_id = %task_agent, "position reporter started");

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                fix = provider.next_fix() => {
                    let Some(fix) = fix else { break };
                    if *stop_rx.borrow() {
                        break;
                    }
                    match samples.try_send(fix.into_sample(&task_agent)) {
                        Ok(()) => stats.sent += 1,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            stats.dropped += 1;
                            tracing::debug!(agent_id = %task_agent, "ingest channel full, fix dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }
        }

        tracing::info!(
            agent_id = %task_agent,
            sent = stats.sent,
            dropped = stats.dropped,
            "position reporter stopped"
        );
        stats
    });

    ReporterHandle {
        agent_id,
        stop_tx,
        join,
    }
}
