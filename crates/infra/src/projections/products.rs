use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use fieldstock_core::{AggregateId, BusinessId};
use fieldstock_events::EventEnvelope;
use fieldstock_inventory::{CostEffect, CostingMethod, Product, ProductEvent, ProductId};

use super::{ProjectionError, StreamCursors, decode, replay_order};
use crate::read_model::BusinessStore;

/// Queryable product read model: catalog fields plus the stock figures the
/// ledger maintains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    pub costing_method: CostingMethod,
    pub standard_cost: Option<Decimal>,
    pub current_stock: i64,
    pub reserved_stock: i64,
    pub available_stock: i64,
    pub weighted_average_cost: Decimal,
    pub last_cost: Decimal,
    pub current_cost: Decimal,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub below_reorder_point: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProductReadModel {
    fn refresh_derived(&mut self, at: DateTime<Utc>) {
        self.available_stock = self.current_stock - self.reserved_stock;
        self.current_cost = match (self.costing_method, self.standard_cost) {
            (CostingMethod::StandardCost, Some(standard)) => standard,
            _ => self.weighted_average_cost,
        };
        self.below_reorder_point = self.current_stock <= self.reorder_point;
        self.updated_at = at;
    }

    fn apply_stock(&mut self, quantity_after: i64, effect: &CostEffect) {
        self.current_stock = quantity_after;
        self.weighted_average_cost = effect.weighted_average_cost;
        self.last_cost = effect.last_cost;
    }
}

pub(crate) fn product_stream(event: &ProductEvent) -> (BusinessId, AggregateId) {
    let (business_id, product_id) = match event {
        ProductEvent::ProductCreated(e) => (e.business_id, e.product_id),
        ProductEvent::MovementPosted(e) => (e.business_id, e.product_id),
        ProductEvent::MovementApproved(e) => (e.business_id, e.product_id),
        ProductEvent::MovementReversed(e) => (e.business_id, e.product_id),
        ProductEvent::StockReserved(e) => (e.business_id, e.product_id),
        ProductEvent::ReservationReleased(e) => (e.business_id, e.product_id),
        ProductEvent::ReorderSettingsUpdated(e) => (e.business_id, e.product_id),
        ProductEvent::CostingMethodChanged(e) => (e.business_id, e.product_id),
        ProductEvent::ProductDeactivated(e) => (e.business_id, e.product_id),
    };
    (business_id, product_id.0)
}

/// Product catalog projection (the `products` table).
#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: BusinessStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: BusinessStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, business_id: BusinessId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(business_id, product_id)
    }

    /// All products of a business, ordered by SKU.
    pub fn list(&self, business_id: BusinessId) -> Vec<ProductReadModel> {
        let mut products = self.store.list(business_id);
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        products
    }

    /// SKUs compare case-insensitively after trimming.
    pub fn find_by_sku(&self, business_id: BusinessId, sku: &str) -> Option<ProductReadModel> {
        let wanted = sku.trim();
        self.store
            .list(business_id)
            .into_iter()
            .find(|p| p.sku.trim().eq_ignore_ascii_case(wanted))
    }

    /// Active products at or below their reorder point.
    pub fn reorder_candidates(&self, business_id: BusinessId) -> Vec<ProductReadModel> {
        self.list(business_id)
            .into_iter()
            .filter(|p| p.is_active && p.below_reorder_point)
            .collect()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Product::AGGREGATE_TYPE {
            return Ok(());
        }

        self.cursors.advance(envelope, || {
            let event: ProductEvent = decode(envelope, product_stream)?;
            self.apply_event(envelope.business_id(), event)
        })?;
        Ok(())
    }

    fn apply_event(&self, business_id: BusinessId, event: ProductEvent) -> Result<(), ProjectionError> {
        if let ProductEvent::ProductCreated(e) = event {
            let opening = e.standard_cost.unwrap_or(Decimal::ZERO);
            let mut rm = ProductReadModel {
                product_id: e.product_id,
                sku: e.sku,
                name: e.name,
                is_active: true,
                costing_method: e.costing_method,
                standard_cost: e.standard_cost,
                current_stock: 0,
                reserved_stock: 0,
                available_stock: 0,
                weighted_average_cost: opening,
                last_cost: opening,
                current_cost: opening,
                reorder_point: e.reorder_point,
                reorder_quantity: e.reorder_quantity,
                below_reorder_point: false,
                updated_at: e.occurred_at,
            };
            rm.refresh_derived(e.occurred_at);
            self.store.upsert(business_id, e.product_id, rm);
            return Ok(());
        }

        let (_, aggregate_id) = product_stream(&event);
        let product_id = ProductId::new(aggregate_id);
        let mut rm = self.store.get(business_id, &product_id).ok_or_else(|| {
            ProjectionError::Unavailable(format!("product {product_id} missing from catalog"))
        })?;

        let at = fieldstock_events::Event::occurred_at(&event);
        match event {
            ProductEvent::ProductCreated(_) => {}
            ProductEvent::MovementPosted(e) => {
                if let Some(effect) = &e.effect {
                    rm.apply_stock(e.movement.quantity_after, effect);
                }
            }
            ProductEvent::MovementApproved(e) => rm.apply_stock(e.quantity_after, &e.effect),
            ProductEvent::MovementReversed(e) => rm.apply_stock(e.reversal.quantity_after, &e.effect),
            ProductEvent::StockReserved(e) => rm.reserved_stock += e.quantity,
            ProductEvent::ReservationReleased(e) => rm.reserved_stock -= e.quantity,
            ProductEvent::ReorderSettingsUpdated(e) => {
                rm.reorder_point = e.reorder_point;
                rm.reorder_quantity = e.reorder_quantity;
            }
            ProductEvent::CostingMethodChanged(e) => {
                rm.costing_method = e.costing_method;
                rm.standard_cost = e.standard_cost;
                rm.weighted_average_cost = e.weighted_average_cost;
            }
            ProductEvent::ProductDeactivated(_) => rm.is_active = false,
        }

        rm.refresh_derived(at);
        self.store.upsert(business_id, product_id, rm);
        Ok(())
    }

    /// Rebuild one business's catalog from scratch.
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
