//! Projection implementations (read model builders).
//!
//! Projections consume committed envelopes and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Business-isolated**: data is partitioned by `business_id`
//! - **Idempotent**: safe for at-least-once delivery (see [`cursor`])

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use fieldstock_core::{AggregateId, BusinessId};
use fieldstock_events::EventEnvelope;

pub mod cursor;
pub mod products;
pub mod purchase_orders;
pub mod stock_ledger;
pub mod suppliers;

pub use cursor::StreamCursors;
pub use products::{ProductCatalogProjection, ProductReadModel};
pub use purchase_orders::{PurchaseOrderReadModel, PurchaseOrdersProjection};
pub use stock_ledger::{LedgerEntry, StockLedgerProjection};
pub use suppliers::{SupplierReadModel, SuppliersProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("read model unavailable: {0}")]
    Unavailable(String),
}

/// Decode an envelope payload and check it belongs to the envelope's stream.
pub(crate) fn decode<E: DeserializeOwned>(
    envelope: &EventEnvelope<JsonValue>,
    event_business: impl FnOnce(&E) -> (BusinessId, AggregateId),
) -> Result<E, ProjectionError> {
    let event: E = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

    let (business_id, aggregate_id) = event_business(&event);
    if business_id != envelope.business_id() {
        return Err(ProjectionError::TenantIsolation(
            "event business_id does not match envelope business_id".to_string(),
        ));
    }
    if aggregate_id != envelope.aggregate_id() {
        return Err(ProjectionError::TenantIsolation(
            "event aggregate id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(event)
}

/// Deterministic replay order for rebuilds: aggregate, then sequence.
pub(crate) fn replay_order(envelopes: &mut [EventEnvelope<JsonValue>]) {
    envelopes.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));
}
