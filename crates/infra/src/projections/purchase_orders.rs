use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use fieldstock_core::{Aggregate, AggregateId, BusinessId};
use fieldstock_events::EventEnvelope;
use fieldstock_purchasing::{
    ApprovalStatus, LineItemId, OrderTotals, PurchaseOrder, PurchaseOrderApproval,
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderLineItem, PurchaseOrderStatus, SupplierId,
};

use super::{ProjectionError, StreamCursors, decode, replay_order};
use crate::read_model::BusinessStore;

/// Purchase order header with its line items and approval rows
/// (`purchase_orders`, `purchase_order_line_items`, `purchase_order_approvals`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderReadModel {
    pub order_id: PurchaseOrderId,
    pub supplier_id: Option<SupplierId>,
    pub order_number: String,
    pub status: PurchaseOrderStatus,
    pub approval_status: ApprovalStatus,
    pub required_approval_levels: u32,
    pub current_approval_level: u32,
    pub approvals: Vec<PurchaseOrderApproval>,
    pub lines: Vec<PurchaseOrderLineItem>,
    pub tax_rate: Decimal,
    #[serde(flatten)]
    pub totals: OrderTotals,
    pub order_date: Option<NaiveDate>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl PurchaseOrderReadModel {
    fn from_order(order: &PurchaseOrder) -> Self {
        Self {
            order_id: order.id_typed(),
            supplier_id: order.supplier_id(),
            order_number: order.order_number().to_string(),
            status: order.status(),
            approval_status: order.approval_status(),
            required_approval_levels: order.required_approval_levels(),
            current_approval_level: order.current_approval_level(),
            approvals: order.approvals().to_vec(),
            lines: order.lines().to_vec(),
            tax_rate: order.tax_rate(),
            totals: order.totals(),
            order_date: order.order_date(),
            expected_delivery_date: order.expected_delivery_date(),
            actual_delivery_date: order.actual_delivery_date(),
            notes: order.notes().map(str::to_string),
        }
    }
}

fn order_stream(event: &PurchaseOrderEvent) -> (BusinessId, AggregateId) {
    let (business_id, order_id) = match event {
        PurchaseOrderEvent::PurchaseOrderCreated(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::LineItemAdded(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::LineItemUpdated(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::LineItemRemoved(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::ChargesSet(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::SubmittedForApproval(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::ApprovalGranted(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::ApprovalDenied(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::PurchaseOrderSent(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::PurchaseOrderConfirmed(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::LineItemReceived(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::PurchaseOrderCancelled(e) => (e.business_id, e.order_id),
        PurchaseOrderEvent::PurchaseOrderClosed(e) => (e.business_id, e.order_id),
    };
    (business_id, order_id.0)
}

/// Purchase order projection.
///
/// Events are folded through the aggregate's own `apply`, so the read model
/// reports exactly the approval level and status the workflow enforces.
#[derive(Debug)]
pub struct PurchaseOrdersProjection<S>
where
    S: BusinessStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    store: S,
    folds: RwLock<HashMap<(BusinessId, PurchaseOrderId), PurchaseOrder>>,
    cursors: StreamCursors,
}

impl<S> PurchaseOrdersProjection<S>
where
    S: BusinessStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            folds: RwLock::new(HashMap::new()),
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, business_id: BusinessId, order_id: &PurchaseOrderId) -> Option<PurchaseOrderReadModel> {
        self.store.get(business_id, order_id)
    }

    /// Orders of a business by order number, optionally filtered by status.
    pub fn list(&self, business_id: BusinessId, status: Option<PurchaseOrderStatus>) -> Vec<PurchaseOrderReadModel> {
        let mut orders: Vec<_> = self
            .store
            .list(business_id)
            .into_iter()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .collect();
        orders.sort_by(|a, b| a.order_number.cmp(&b.order_number));
        orders
    }

    pub fn for_supplier(&self, business_id: BusinessId, supplier_id: SupplierId) -> Vec<PurchaseOrderReadModel> {
        self.list(business_id, None)
            .into_iter()
            .filter(|o| o.supplier_id == Some(supplier_id))
            .collect()
    }

    /// The order owning a line item, with the line.
    pub fn find_line(
        &self,
        business_id: BusinessId,
        line_id: LineItemId,
    ) -> Option<(PurchaseOrderId, PurchaseOrderLineItem)> {
        self.store.list(business_id).into_iter().find_map(|o| {
            o.lines
                .iter()
                .find(|l| l.line_id == line_id)
                .map(|l| (o.order_id, l.clone()))
        })
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PurchaseOrder::AGGREGATE_TYPE {
            return Ok(());
        }

        self.cursors.advance(envelope, || {
            let event: PurchaseOrderEvent = decode(envelope, order_stream)?;
            let business_id = envelope.business_id();
            let order_id = PurchaseOrderId::new(envelope.aggregate_id());

            let mut folds = self
                .folds
                .write()
                .map_err(|_| ProjectionError::Unavailable("purchase order fold lock poisoned".to_string()))?;
            let order = folds
                .entry((business_id, order_id))
                .or_insert_with(|| PurchaseOrder::empty(order_id));
            order.apply(&event);

            self.store
                .upsert(business_id, order_id, PurchaseOrderReadModel::from_order(order));
            Ok(())
        })?;
        Ok(())
    }

    /// Rebuild one business's orders from scratch.
    pub fn rebuild(
        &self,
        business_id: BusinessId,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear_business(business_id);
        self.store.clear_business(business_id);
        if let Ok(mut folds) = self.folds.write() {
            folds.retain(|(b, _), _| *b != business_id);
        }

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
