//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (business-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, version-checked, possibly across streams)
//!   ↓
//! 5. Publish committed envelopes to the bus
//! ```
//!
//! Single-aggregate commands go through [`CommandDispatcher::dispatch`].
//! Operations that must change several aggregates together (a receipt touches
//! the purchase order and the product) load each one, stage the decided
//! events in a [`UnitOfWork`] and commit it once; the store checks every
//! loaded revision before writing anything.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use fieldstock_core::{Aggregate, AggregateId, BusinessId, DomainError, ExpectedVersion};
use fieldstock_events::{EventBus, EventEnvelope, execute};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A stream changed between load and commit. The whole operation may be retried.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Cross-business stream mixing.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Deterministic business failure, surfaced verbatim.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Historical payloads could not be decoded into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Publication failed after a successful append (events are persisted).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    /// Only concurrent modification is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::ConcurrentModification(_))
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::ConcurrentModification(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// A rehydrated aggregate together with the revision it was loaded at and
/// the events decided against it so far.
#[derive(Debug)]
pub struct Loaded<A: Aggregate> {
    aggregate_id: AggregateId,
    aggregate: A,
    loaded_version: u64,
    pending: Vec<A::Event>,
}

impl<A> Loaded<A>
where
    A: Aggregate<Error = DomainError>,
{
    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn loaded_version(&self) -> u64 {
        self.loaded_version
    }

    /// Whether the stream had any events when loaded.
    pub fn exists(&self) -> bool {
        self.loaded_version > 0
    }

    /// Decide and apply a command in memory; nothing is persisted until commit.
    pub fn execute(&mut self, command: &A::Command) -> Result<Vec<A::Event>, DispatchError> {
        let events = execute(&mut self.aggregate, command)?;
        self.pending.extend(events.iter().cloned());
        Ok(events)
    }

    pub fn pending(&self) -> &[A::Event] {
        &self.pending
    }

    pub fn into_parts(self) -> (A, Vec<A::Event>) {
        (self.aggregate, self.pending)
    }
}

/// Events staged for one atomic commit across streams of one business.
#[derive(Debug)]
pub struct UnitOfWork {
    business_id: BusinessId,
    appends: Vec<StreamAppend>,
}

impl UnitOfWork {
    pub fn new(business_id: BusinessId) -> Self {
        Self {
            business_id,
            appends: Vec::new(),
        }
    }

    /// Stage `loaded`'s pending events, expecting its stream to still be at the loaded revision.
    pub fn stage<A>(&mut self, aggregate_type: &str, loaded: &Loaded<A>) -> Result<(), DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: fieldstock_events::Event + Serialize,
    {
        if loaded.pending.is_empty() {
            return Ok(());
        }
        let events = loaded
            .pending
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    self.business_id,
                    loaded.aggregate_id,
                    aggregate_type,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.appends.push(StreamAppend {
            expected_version: ExpectedVersion::Exact(loaded.loaded_version),
            events,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.appends.is_empty()
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Events are appended before they are published; if publication fails the
/// error is returned but the events stay committed (at-least-once).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate one aggregate.
    pub fn load<A>(
        &self,
        business_id: BusinessId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Loaded<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(business_id, aggregate_id)?;
        validate_loaded_stream(business_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        Ok(Loaded {
            aggregate_id,
            aggregate,
            loaded_version: stream_version(&history),
            pending: Vec::new(),
        })
    }

    /// Persist a unit of work atomically, then publish what was committed.
    pub fn commit(&self, work: UnitOfWork) -> Result<Vec<StoredEvent>, DispatchError> {
        if work.is_empty() {
            return Ok(vec![]);
        }
        let committed = self.store.append_all(work.appends)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Load, decide, persist and publish a single-aggregate command.
    ///
    /// Returns the aggregate as of the new revision, the decided events and
    /// their stored form.
    pub fn dispatch<A>(
        &self,
        business_id: BusinessId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: fieldstock_events::Event + Serialize + DeserializeOwned,
    {
        let mut loaded = self.load(business_id, aggregate_id, make_aggregate)?;
        loaded.execute(&command)?;

        let mut work = UnitOfWork::new(business_id);
        work.stage(aggregate_type, &loaded)?;
        let stored = self.commit(work)?;

        let (aggregate, events) = loaded.into_parts();
        Ok(Dispatched {
            aggregate,
            events,
            stored,
        })
    }
}

/// Result of a committed single-aggregate command.
#[derive(Debug)]
pub struct Dispatched<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub stored: Vec<StoredEvent>,
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    business_id: BusinessId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // A backend must never hand back another business's events.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.business_id != business_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong business_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use fieldstock_core::AggregateRoot;
    use fieldstock_events::InMemoryEventBus;
    use fieldstock_inventory::{
        CostingMethod, CreateProduct, MovementId, MovementType, PostMovement, Product,
        ProductCommand, ProductId,
    };
    use rust_decimal_macros::dec;

    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn dispatcher() -> (CommandDispatcher<Arc<InMemoryEventStore>, Bus>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus.clone()), bus)
    }

    fn create(business_id: BusinessId, product_id: ProductId) -> ProductCommand {
        ProductCommand::CreateProduct(CreateProduct {
            business_id,
            product_id,
            sku: "CAP-45".to_string(),
            name: "Run capacitor 45/5".to_string(),
            costing_method: CostingMethod::WeightedAverage,
            standard_cost: None,
            reorder_point: 2,
            reorder_quantity: 10,
            occurred_at: Utc::now(),
        })
    }

    fn receive(business_id: BusinessId, product_id: ProductId, quantity: i64) -> ProductCommand {
        ProductCommand::PostMovement(PostMovement {
            business_id,
            product_id,
            movement_id: MovementId::generate(),
            movement_type: MovementType::Purchase,
            quantity,
            unit_cost: Some(dec!(12.50)),
            cost_lot: None,
            reference: None,
            requires_approval: false,
            posted_by: None,
            notes: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_then_publishes() {
        let (dispatcher, bus) = dispatcher();
        let sub = bus.subscribe();
        let business_id = BusinessId::new();
        let product_id = ProductId::generate();

        let created = dispatcher
            .dispatch(business_id, product_id.0, "inventory.product", create(business_id, product_id), |id| {
                Product::empty(ProductId::new(id))
            })
            .unwrap();
        assert_eq!(created.aggregate.version(), 1);
        assert_eq!(created.stored[0].sequence_number, 1);

        let posted = dispatcher
            .dispatch(business_id, product_id.0, "inventory.product", receive(business_id, product_id, 4), |id| {
                Product::empty(ProductId::new(id))
            })
            .unwrap();
        assert_eq!(posted.aggregate.current_stock(), 4);

        let published = sub.drain();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].sequence_number(), 2);
    }

    #[test]
    fn domain_rejection_writes_nothing() {
        let (dispatcher, bus) = dispatcher();
        let sub = bus.subscribe();
        let business_id = BusinessId::new();
        let product_id = ProductId::generate();

        let err = dispatcher
            .dispatch(business_id, product_id.0, "inventory.product", receive(business_id, product_id, 4), |id| {
                Product::empty(ProductId::new(id))
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::NotFound)));
        assert!(!err.is_retryable());
        assert!(sub.drain().is_empty());
        assert!(dispatcher.store().load_stream(business_id, product_id.0).unwrap().is_empty());
    }

    #[test]
    fn stale_revision_is_a_retryable_conflict() {
        let (dispatcher, _bus) = dispatcher();
        let business_id = BusinessId::new();
        let product_id = ProductId::generate();
        dispatcher
            .dispatch(business_id, product_id.0, "inventory.product", create(business_id, product_id), |id| {
                Product::empty(ProductId::new(id))
            })
            .unwrap();

        let make = |id| Product::empty(ProductId::new(id));
        let mut first = dispatcher.load(business_id, product_id.0, make).unwrap();
        let mut second = dispatcher.load(business_id, product_id.0, make).unwrap();
        first.execute(&receive(business_id, product_id, 1)).unwrap();
        second.execute(&receive(business_id, product_id, 2)).unwrap();

        let mut work = UnitOfWork::new(business_id);
        work.stage("inventory.product", &first).unwrap();
        dispatcher.commit(work).unwrap();

        let mut work = UnitOfWork::new(business_id);
        work.stage("inventory.product", &second).unwrap();
        let err = dispatcher.commit(work).unwrap_err();
        assert!(err.is_retryable());
    }
}
