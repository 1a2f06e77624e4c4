use std::collections::HashMap;
use std::sync::RwLock;

use fieldstock_core::{AggregateId, BusinessId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    business_id: BusinessId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// One write lock covers a whole `append_all`, so multi-stream commits are
/// serialized and atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

/// Check one stream batch is homogeneous; returns its key and aggregate type.
fn validate_batch(events: &[UncommittedEvent]) -> Result<(StreamKey, String), EventStoreError> {
    let first = &events[0];
    for (idx, e) in events.iter().enumerate() {
        if e.business_id != first.business_id {
            return Err(EventStoreError::TenantIsolation(format!(
                "batch contains multiple business_ids (index {idx})"
            )));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }
    Ok((
        StreamKey {
            business_id: first.business_id,
            aggregate_id: first.aggregate_id,
        },
        first.aggregate_type.clone(),
    ))
}

impl EventStore for InMemoryEventStore {
    fn append_all(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let appends: Vec<_> = appends.into_iter().filter(|a| !a.events.is_empty()).collect();
        if appends.is_empty() {
            return Ok(vec![]);
        }

        let mut keyed = Vec::with_capacity(appends.len());
        for append in appends {
            let (key, aggregate_type) = validate_batch(&append.events)?;
            keyed.push((key, aggregate_type, append));
        }

        let business_id = keyed[0].0.business_id;
        if keyed.iter().any(|(k, _, _)| k.business_id != business_id) {
            return Err(EventStoreError::TenantIsolation(
                "commit spans multiple business_ids".to_string(),
            ));
        }
        for (i, (key, _, _)) in keyed.iter().enumerate() {
            if keyed[..i].iter().any(|(k, _, _)| k == key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "commit appends to stream {} twice",
                    key.aggregate_id
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        // Check every stream before writing any of them.
        for (key, aggregate_type, append) in &keyed {
            let stream = streams.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);

            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    key.aggregate_id, append.expected_version
                )));
            }

            if let Some(existing) = stream.first() {
                if &existing.aggregate_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for (key, _, append) in keyed {
            let stream = streams.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    business_id: e.business_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        business_id: BusinessId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            business_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    fn load_business(&self, business_id: BusinessId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let mut events: Vec<StoredEvent> = streams
            .iter()
            .filter(|(k, _)| k.business_id == business_id)
            .flat_map(|(_, s)| s.iter().cloned())
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.aggregate_id, e.sequence_number));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldstock_core::ExpectedVersion;
    use uuid::Uuid;

    fn event(business_id: BusinessId, aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            business_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_and_grow() {
        let store = InMemoryEventStore::new();
        let (b, a) = (BusinessId::new(), AggregateId::new());
        let first = store
            .append(vec![event(b, a, "t"), event(b, a, "t")], ExpectedVersion::NoStream)
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);

        let err = store.append(vec![event(b, a, "t")], ExpectedVersion::Exact(1)).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn multi_stream_commit_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let (b, order, product) = (BusinessId::new(), AggregateId::new(), AggregateId::new());
        store.append(vec![event(b, product, "p")], ExpectedVersion::NoStream).unwrap();

        let err = store
            .append_all(vec![
                StreamAppend {
                    expected_version: ExpectedVersion::NoStream,
                    events: vec![event(b, order, "o")],
                },
                StreamAppend {
                    expected_version: ExpectedVersion::Exact(0),
                    events: vec![event(b, product, "p")],
                },
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(b, order).unwrap().is_empty());
        assert_eq!(store.load_stream(b, product).unwrap().len(), 1);
    }

    #[test]
    fn streams_are_isolated_per_business() {
        let store = InMemoryEventStore::new();
        let (b1, b2, a) = (BusinessId::new(), BusinessId::new(), AggregateId::new());
        store.append(vec![event(b1, a, "t")], ExpectedVersion::Any).unwrap();
        assert!(store.load_stream(b2, a).unwrap().is_empty());
        assert!(store.load_business(b2).unwrap().is_empty());

        let err = store
            .append_all(vec![
                StreamAppend {
                    expected_version: ExpectedVersion::Any,
                    events: vec![event(b1, AggregateId::new(), "t")],
                },
                StreamAppend {
                    expected_version: ExpectedVersion::Any,
                    events: vec![event(b2, AggregateId::new(), "t")],
                },
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }
}
