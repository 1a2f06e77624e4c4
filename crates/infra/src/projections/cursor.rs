//! Per-stream projection cursors.
//!
//! A cursor records the last applied `sequence_number` per
//! (business, aggregate) stream, which makes projections idempotent under
//! at-least-once delivery: replays at or below the cursor are ignored, and a
//! gap is reported instead of silently skipped.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use fieldstock_core::{AggregateId, BusinessId};
use fieldstock_events::EventEnvelope;

use super::ProjectionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    business_id: BusinessId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, business_id: BusinessId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&CursorKey { business_id, aggregate_id }).copied())
            .unwrap_or(0)
    }

    /// Run `apply` for `envelope` if it is the next event of its stream.
    ///
    /// The write lock is held across `apply`, so a stream is never projected
    /// by two callers at once. The cursor only advances when `apply` succeeds.
    pub fn advance(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        apply: impl FnOnce() -> Result<(), ProjectionError>,
    ) -> Result<bool, ProjectionError> {
        let mut cursors = self
            .inner
            .write()
            .map_err(|_| ProjectionError::Unavailable("cursor lock poisoned".to_string()))?;

        let key = CursorKey {
            business_id: envelope.business_id(),
            aggregate_id: envelope.aggregate_id(),
        };
        let last = *cursors.get(&key).unwrap_or(&0);
        let seq = envelope.sequence_number();

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay.
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(key, seq);
        Ok(true)
    }

    pub fn clear_business(&self, business_id: BusinessId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|k, _| k.business_id != business_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn envelope(business_id: BusinessId, aggregate_id: AggregateId, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(Uuid::now_v7(), business_id, aggregate_id, "t", seq, JsonValue::Null)
    }

    #[test]
    fn replays_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let (b, a) = (BusinessId::new(), AggregateId::new());

        assert!(cursors.advance(&envelope(b, a, 1), || Ok(())).unwrap());
        assert!(!cursors.advance(&envelope(b, a, 1), || panic!("replayed")).unwrap());
        assert!(matches!(
            cursors.advance(&envelope(b, a, 3), || Ok(())),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 3 })
        ));
        assert_eq!(cursors.position(b, a), 1);
    }

    #[test]
    fn failed_apply_does_not_advance() {
        let cursors = StreamCursors::new();
        let (b, a) = (BusinessId::new(), AggregateId::new());
        let err = cursors
            .advance(&envelope(b, a, 1), || Err(ProjectionError::Deserialize("bad".into())))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Deserialize(_)));
        assert_eq!(cursors.position(b, a), 0);
    }
}
