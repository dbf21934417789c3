use super::position::Position;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("Live feed hub is shut down")]
    Closed,

    #[error("Position for agent {agent_id} is not newer than the one already published")]
    Superseded { agent_id: String },
}

type SubscriptionKey = (String, String);

struct SubscriptionEntry {
    id: u64,
    revoke: watch::Sender<bool>,
}

#[derive(Default)]
struct HubInner {
    channels: RwLock<HashMap<String, watch::Sender<Option<Position>>>>,
    subscriptions: Mutex<HashMap<SubscriptionKey, SubscriptionEntry>>,
    next_subscription_id: AtomicU64,
    closed: AtomicBool,
}

impl HubInner {
    fn channels(&self) -> RwLockReadGuard<'_, HashMap<String, watch::Sender<Option<Position>>>> {
        self.channels.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn channels_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, watch::Sender<Option<Position>>>> {
        self.channels.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, SubscriptionEntry>> {
        self.subscriptions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Removes the subscription for `key`, or only generation `id` of it when
    /// given. An agent channel left without subscribers and without a
    /// position is dropped with it.
    ///
    /// Lock order is channels, then subscriptions.
    fn release(&self, key: &SubscriptionKey, id: Option<u64>) {
        let mut channels = self.channels_mut();
        let mut subscriptions = self.subscriptions();

        let current = subscriptions
            .get(key)
            .is_some_and(|entry| id.map_or(true, |id| entry.id == id));
        if !current {
            return;
        }
        if let Some(entry) = subscriptions.remove(key) {
            let _ = entry.revoke.send(true);
        }

        let agent_id = &key.0;
        let watched = subscriptions.keys().any(|(agent, _)| agent == agent_id);
        if !watched && channels.get(agent_id).is_some_and(|sender| sender.borrow().is_none()) {
            channels.remove(agent_id);
        }
    }
}

/// Per-agent last-value-wins fan-out of accepted positions.
///
/// Each agent has one `watch` slot holding its newest position. Publishing
/// overwrites the slot and never waits on readers; a subscriber that falls
/// behind only ever observes the newest value. Cloning the hub is cheap and
/// every clone shares the same registry.
#[derive(Clone, Default)]
pub struct LiveFeedHub {
    inner: Arc<HubInner>,
}

impl LiveFeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `position` to its agent's channel and returns the number of
    /// live receivers. Positions not newer than the held value are refused.
    pub fn publish(&self, position: &Position) -> Result<usize, FeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }

        {
            let channels = self.inner.channels();
            if let Some(sender) = channels.get(&position.agent_id) {
                return Self::advance(sender, position);
            }
        }

        let mut channels = self.inner.channels_mut();
        let sender = channels
            .entry(position.agent_id.clone())
            .or_insert_with(|| watch::channel(None).0);
        Self::advance(sender, position)
    }

    fn advance(
        sender: &watch::Sender<Option<Position>>,
        position: &Position,
    ) -> Result<usize, FeedError> {
        let advanced = sender.send_if_modified(|held| match held {
            Some(current) if current.recorded_at >= position.recorded_at => false,
            _ => {
                *held = Some(position.clone());
                true
            }
        });
        if advanced {
            Ok(sender.receiver_count())
        } else {
            Err(FeedError::Superseded {
                agent_id: position.agent_id.clone(),
            })
        }
    }

    /// Attaches `observer_id` to `agent_id`'s feed. The first value yielded is
    /// the latest known position, if any. A previous subscription of the same
    /// observer to the same agent is replaced and its stream ends.
    pub fn subscribe(&self, agent_id: &str, observer_id: &str) -> Result<Subscription, FeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }

        // Held until the subscription is recorded so a concurrent release
        // cannot drop the channel in between.
        let mut channels = self.inner.channels_mut();
        let mut receiver = channels
            .entry(agent_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        let snapshot = receiver.borrow_and_update().clone();

        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (revoke_tx, revoke_rx) = watch::channel(false);
        let key = (agent_id.to_string(), observer_id.to_string());

        let replaced = self
            .inner
            .subscriptions()
            .insert(key.clone(), SubscriptionEntry { id, revoke: revoke_tx });
        drop(channels);
        if let Some(previous) = replaced {
            tracing::debug!(agent_id, observer_id, "replacing existing live feed subscription");
            let _ = previous.revoke.send(true);
        }

        Ok(Subscription {
            key,
            id,
            snapshot,
            receiver,
            revoked: revoke_rx,
            hub: Arc::downgrade(&self.inner),
        })
    }

    /// Detaches an observer. Safe to call any number of times, including after
    /// the agent's channel was closed.
    pub fn unsubscribe(&self, agent_id: &str, observer_id: &str) {
        let key = (agent_id.to_string(), observer_id.to_string());
        self.inner.release(&key, None);
    }

    /// Drops the channel of an agent whose session ended. Every open stream
    /// for that agent terminates.
    pub fn close_agent(&self, agent_id: &str) {
        let mut channels = self.inner.channels_mut();
        channels.remove(agent_id);
        self.inner
            .subscriptions()
            .retain(|(agent, _), _| agent != agent_id);
    }

    pub fn latest(&self, agent_id: &str) -> Option<Position> {
        self.inner
            .channels()
            .get(agent_id)
            .and_then(|sender| sender.borrow().clone())
    }

    pub fn subscriber_count(&self, agent_id: &str) -> usize {
        self.inner
            .subscriptions()
            .keys()
            .filter(|(agent, _)| agent == agent_id)
            .count()
    }

    /// Refuses further publishes and subscriptions and ends all streams.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut channels = self.inner.channels_mut();
        channels.clear();
        self.inner.subscriptions().clear();
    }
}

/// Handle to one observer's stream of an agent's positions.
///
/// Dropping the handle releases the subscription.
pub struct Subscription {
    key: SubscriptionKey,
    id: u64,
    snapshot: Option<Position>,
    receiver: watch::Receiver<Option<Position>>,
    revoked: watch::Receiver<bool>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn agent_id(&self) -> &str {
        &self.key.0
    }

    pub fn observer_id(&self) -> &str {
        &self.key.1
    }

    /// Waits for the next position. Returns `None` once the subscription was
    /// replaced, released, or its agent channel closed.
    pub async fn next(&mut self) -> Option<Position> {
        if *self.revoked.borrow() {
            return None;
        }
        if let Some(snapshot) = self.snapshot.take() {
            return Some(snapshot);
        }

        loop {
            tokio::select! {
                biased;
                _ = self.revoked.changed() => return None,
                changed = self.receiver.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    if let Some(position) = self.receiver.borrow_and_update().clone() {
                        return Some(position);
                    }
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.release(&self.key, Some(self.id));
        }
    }
}
