use crate::common::{DomainEvent, DomainResult};
use serde::{Deserialize, Serialize};

pub trait AggregateRoot: Send + Sync + Clone {
    type Event: DomainEvent + Serialize + for<'de> Deserialize<'de>;

    fn aggregate_id(&self) -> &str;
    fn version(&self) -> u64;

    /// Apply an event to update the aggregate state
    fn apply(&mut self, event: &Self::Event) -> DomainResult<()>;

    fn uncommitted_events(&self) -> &[Self::Event];

    /// Hands the pending events to the caller and clears them.
    fn take_uncommitted_events(&mut self) -> Vec<Self::Event>;

    fn add_event(&mut self, event: Self::Event);

    /// Records and applies an event in one step.
    fn raise(&mut self, event: Self::Event) -> DomainResult<()> {
        self.apply(&event)?;
        self.add_event(event);
        Ok(())
    }
}

/// Rebuilds an aggregate from its event history.
pub fn replay<T: AggregateRoot>(mut aggregate: T, events: &[T::Event]) -> DomainResult<T> {
    for event in events {
        aggregate.apply(event)?;
    }
    Ok(aggregate)
}
