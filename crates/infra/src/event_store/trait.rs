use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use fieldstock_core::{AggregateId, BusinessId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// Lifecycle:
///
/// 1. **Domain event**: produced by an aggregate's `handle()`
/// 2. **UncommittedEvent**: wrapped with stream metadata (business, aggregate, type)
/// 3. **StoredEvent**: persisted with an assigned `sequence_number`
/// 4. **EventEnvelope**: published to the bus for projections and subscribers
///
/// Build one with [`UncommittedEvent::from_typed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub business_id: BusinessId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are stream-scoped (`business_id` + `aggregate_id`), start
/// at 1 and grow by one per event. The last one is the stream revision used
/// for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub business_id: BusinessId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into a business-scoped envelope for publication.
    pub fn to_envelope(&self) -> fieldstock_events::EventEnvelope<JsonValue> {
        fieldstock_events::EventEnvelope::new(
            self.event_id,
            self.business_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Events for one stream plus the revision the writer loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

/// Event store operation error.
///
/// Infrastructure failures (storage, concurrency, isolation), as opposed to
/// domain errors.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, business-scoped event store.
///
/// Events live in streams keyed by `(business_id, aggregate_id)`, one per
/// aggregate instance.
///
/// `append_all` commits several streams as one unit: every expected version
/// is checked before anything is written, and either all streams grow or
/// none do. This is how a receipt updates the purchase order and the
/// product's ledger together.
///
/// Implementations must:
/// - reject a batch that mixes businesses (tenant isolation)
/// - reject a stream batch that mixes aggregates or aggregate types
/// - enforce optimistic concurrency against the current stream revision
/// - assign `sequence_number`s starting at `current_version + 1`, without gaps
pub trait EventStore: Send + Sync {
    /// Append to several streams atomically.
    fn append_all(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for a business + aggregate, in sequence order.
    fn load_stream(
        &self,
        business_id: BusinessId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Every stored event of one business, for projection rebuilds.
    fn load_business(&self, business_id: BusinessId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append to a single stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_all(vec![StreamAppend {
            expected_version,
            events,
        }])
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_all(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_all(appends)
    }

    fn load_stream(
        &self,
        business_id: BusinessId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(business_id, aggregate_id)
    }

    fn load_business(&self, business_id: BusinessId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_business(business_id)
    }
}

impl UncommittedEvent {
    /// Wrap a typed domain event, capturing the metadata needed to decode it later.
    pub fn from_typed<E>(
        business_id: BusinessId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: fieldstock_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            business_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
