use serde::Serialize;
use serde_json::Value as JsonValue;

use fieldstock_core::{AggregateId, BusinessId};
use fieldstock_events::EventEnvelope;
use fieldstock_purchasing::{Supplier, SupplierContact, SupplierEvent, SupplierId, SupplierPerformance};

use super::{ProjectionError, StreamCursors, decode, replay_order};
use crate::read_model::BusinessStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupplierReadModel {
    pub supplier_id: SupplierId,
    pub name: String,
    pub contact: SupplierContact,
    pub payment_terms: Option<String>,
    pub performance: SupplierPerformance,
}

fn supplier_stream(event: &SupplierEvent) -> (BusinessId, AggregateId) {
    match event {
        SupplierEvent::SupplierRegistered(e) => (e.business_id, e.supplier_id.0),
        SupplierEvent::SupplierPerformanceRecorded(e) => (e.business_id, e.supplier_id.0),
    }
}

/// Supplier directory with delivery metrics.
#[derive(Debug)]
pub struct SuppliersProjection<S>
where
    S: BusinessStore<SupplierId, SupplierReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SuppliersProjection<S>
where
    S: BusinessStore<SupplierId, SupplierReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, business_id: BusinessId, supplier_id: &SupplierId) -> Option<SupplierReadModel> {
        self.store.get(business_id, supplier_id)
    }

    pub fn list(&self, business_id: BusinessId) -> Vec<SupplierReadModel> {
        let mut suppliers = self.store.list(business_id);
        suppliers.sort_by(|a, b| a.name.cmp(&b.name));
        suppliers
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Supplier::AGGREGATE_TYPE {
            return Ok(());
        }

        self.cursors.advance(envelope, || {
            let business_id = envelope.business_id();
            match decode(envelope, supplier_stream)? {
                SupplierEvent::SupplierRegistered(e) => {
                    self.store.upsert(
                        business_id,
                        e.supplier_id,
                        SupplierReadModel {
                            supplier_id: e.supplier_id,
                            name: e.name,
                            contact: e.contact,
                            payment_terms: e.payment_terms,
                            performance: SupplierPerformance::default(),
                        },
                    );
                }
                SupplierEvent::SupplierPerformanceRecorded(e) => {
                    let mut rm = self.store.get(business_id, &e.supplier_id).ok_or_else(|| {
                        ProjectionError::Unavailable(format!("supplier {} missing", e.supplier_id))
                    })?;
                    rm.performance = e.performance;
                    self.store.upsert(business_id, e.supplier_id, rm);
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn rebuild(
        &self,
        business_id: BusinessId,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear_business(business_id);
        self.store.clear_business(business_id);

        let mut envs: Vec<_> = envelopes
            .into_iter()
            .filter(|e| e.business_id() == business_id)
            .collect();
        replay_order(&mut envs);

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
