//! Receiving: one receipt updates the purchase order line and posts the
//! matching `purchase` movement to the ledger, all in one commit.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use fieldstock_core::{AggregateRoot, DomainError, UserId};
use fieldstock_events::{EventBus, EventEnvelope};
use fieldstock_inventory::{
    MovementReference, MovementType, PostMovement, Product, ProductCommand, ProductId, StockMovement,
};
use fieldstock_purchasing::{
    PurchaseOrder, PurchaseOrderCommand, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderLineItem,
    ReceiveLineItem,
};

use super::ledger::written_movement;
use super::{Backend, log_rejection};
use crate::command_dispatcher::{DispatchError, UnitOfWork};
use crate::event_store::EventStore;

/// Everything a committed receipt changed.
#[derive(Debug)]
pub struct Receipt {
    pub order: PurchaseOrder,
    pub product: Product,
    pub movement: StockMovement,
    pub line: PurchaseOrderLineItem,
}

#[derive(Debug)]
pub struct ReceivingService<S, B> {
    backend: Arc<Backend<S, B>>,
}

impl<S, B> Clone for ReceivingService<S, B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<S, B> ReceivingService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(backend: Arc<Backend<S, B>>) -> Self {
        Self { backend }
    }

    /// Receive `cmd.quantity` against one line.
    ///
    /// Over-receipt, a closed or cancelled order, or a ledger rejection leaves
    /// both the order and the product untouched.
    #[instrument(
        skip(self, cmd, posted_by),
        fields(
            business_id = %cmd.business_id,
            order_id = %cmd.order_id,
            line_id = %cmd.line_id,
            movement_id = %cmd.movement_id,
            quantity = cmd.quantity,
        )
    )]
    pub fn receive_line_item(&self, cmd: ReceiveLineItem, posted_by: Option<UserId>) -> Result<Receipt, DispatchError> {
        self.try_receive(cmd, posted_by)
            .map_err(|e| log_rejection("receive_line_item", e))
    }

    fn try_receive(&self, cmd: ReceiveLineItem, posted_by: Option<UserId>) -> Result<Receipt, DispatchError> {
        let business_id = cmd.business_id;
        let dispatcher = self.backend.dispatcher();

        let mut order = dispatcher.load(business_id, cmd.order_id.0, |id| {
            PurchaseOrder::empty(PurchaseOrderId::new(id))
        })?;
        let product_id = order
            .aggregate()
            .line(cmd.line_id)
            .map(|l| l.product_id)
            .ok_or_else(DomainError::not_found)?;

        let received = order
            .execute(&PurchaseOrderCommand::ReceiveLineItem(cmd.clone()))?
            .into_iter()
            .find_map(|e| match e {
                PurchaseOrderEvent::LineItemReceived(r) => Some(r),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("receipt produced no line event"))?;

        let mut product = dispatcher.load(business_id, product_id.0, |id| Product::empty(ProductId::new(id)))?;
        let order_number = order.aggregate().order_number().to_string();
        let line_no = order.aggregate().line(cmd.line_id).map(|l| l.line_no).unwrap_or_default();
        let product_events = product.execute(&ProductCommand::PostMovement(PostMovement {
            business_id,
            product_id,
            movement_id: cmd.movement_id,
            movement_type: MovementType::Purchase,
            quantity: received.quantity,
            unit_cost: Some(received.unit_cost),
            cost_lot: None,
            reference: Some(MovementReference::purchase_order(*cmd.order_id.0.as_uuid())),
            requires_approval: false,
            posted_by,
            notes: Some(format!("received against {order_number} line {line_no}")),
            occurred_at: cmd.occurred_at,
        }))?;
        let movement = written_movement(&product_events)
            .cloned()
            .ok_or_else(|| DomainError::invariant("receipt posted no movement"))?;

        let mut work = UnitOfWork::new(business_id);
        work.stage(PurchaseOrder::AGGREGATE_TYPE, &order)?;
        work.stage(Product::AGGREGATE_TYPE, &product)?;
        let stored = dispatcher.commit(work)?;

        self.backend.project(business_id, &stored);
        let (product, product_events) = product.into_parts();
        self.backend.notify(&product, &product_events);

        let (order, _) = order.into_parts();
        let line = order
            .line(cmd.line_id)
            .cloned()
            .ok_or_else(|| DomainError::invariant("received line vanished"))?;

        info!(
            unit_cost = %movement.unit_cost,
            quantity_received = line.quantity_received,
            quantity_remaining = line.quantity_remaining(),
            status = order.status().as_str(),
            current_stock = product.current_stock(),
            version = order.version(),
            "line item received"
        );
        Ok(Receipt {
            order,
            product,
            movement,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use fieldstock_core::BusinessId;
    use fieldstock_inventory::MovementId;
    use fieldstock_purchasing::{ClosePurchaseOrder, LineItemId, PerformanceGrade, PurchaseOrderStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::services::procurement::tests::{Fixture, date, fixture};

    fn receive(
        business_id: BusinessId,
        order_id: PurchaseOrderId,
        line_id: LineItemId,
        quantity: i64,
        unit_cost: Option<Decimal>,
        day: u32,
    ) -> ReceiveLineItem {
        ReceiveLineItem {
            business_id,
            order_id,
            line_id,
            quantity,
            unit_cost,
            movement_id: MovementId::generate(),
            received_on: date(day),
            occurred_at: Utc::now(),
        }
    }

    fn receiving(f: &Fixture) -> ReceivingService<crate::services::test_support::TestStore, crate::services::test_support::TestBus> {
        ReceivingService::new(f.backend.clone())
    }

    #[test]
    fn partial_receipts_then_over_receipt_then_completion() {
        let f = fixture();
        let svc = receiving(&f);
        let product_id = f.product("CONDENSER-3T");
        let order_id = f.draft(0, Some(date(10)));
        let line_id = f.line(order_id, product_id, 10, dec!(5));
        let other = f.line(order_id, f.product("PAD-36"), 1, dec!(40));
        f.send(order_id);

        let first = svc
            .receive_line_item(receive(f.business_id, order_id, line_id, 6, None, 5), None)
            .unwrap();
        assert_eq!(first.line.quantity_received, 6);
        assert_eq!(first.order.status(), PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(first.product.current_stock(), 6);
        assert_eq!(first.movement.unit_cost, dec!(5));
        assert_eq!(first.movement.movement_type, MovementType::Purchase);

        let over = svc
            .receive_line_item(receive(f.business_id, order_id, line_id, 5, None, 6), None)
            .unwrap_err();
        assert_eq!(
            over.domain(),
            Some(&DomainError::OverReceipt {
                requested: 5,
                remaining: 4
            })
        );
        assert_eq!(f.ledger.product(f.business_id, product_id).unwrap().current_stock, 6);

        let rest = svc
            .receive_line_item(receive(f.business_id, order_id, line_id, 4, Some(dec!(6)), 7), None)
            .unwrap();
        assert!(rest.line.is_fully_received());
        assert_eq!(rest.order.status(), PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(rest.product.weighted_average_cost(), dec!(5.4));

        let last = svc
            .receive_line_item(receive(f.business_id, order_id, other, 1, None, 8), None)
            .unwrap();
        assert_eq!(last.order.status(), PurchaseOrderStatus::Received);

        let rm = f.procurement.purchase_order(f.business_id, order_id).unwrap();
        assert_eq!(rm.status, PurchaseOrderStatus::Received);
        assert_eq!(f.ledger.movements_for_product(f.business_id, product_id).len(), 2);
        assert_eq!(f.ledger.replay_stock(f.business_id, product_id), 10);
    }

    #[test]
    fn receipt_against_a_draft_or_unknown_line_commits_nothing() {
        let f = fixture();
        let svc = receiving(&f);
        let product_id = f.product("VALVE-1");
        let order_id = f.draft(0, None);
        let line_id = f.line(order_id, product_id, 3, dec!(12));

        let draft = svc
            .receive_line_item(receive(f.business_id, order_id, line_id, 1, None, 2), None)
            .unwrap_err();
        assert!(matches!(draft.domain(), Some(DomainError::InvariantViolation(_))));

        f.send(order_id);
        let unknown = svc
            .receive_line_item(receive(f.business_id, order_id, LineItemId::generate(), 1, None, 2), None)
            .unwrap_err();
        assert!(matches!(unknown.domain(), Some(DomainError::NotFound)));

        assert_eq!(f.ledger.product(f.business_id, product_id).unwrap().current_stock, 0);
        assert!(f.ledger.movements_for_product(f.business_id, product_id).is_empty());
    }

    #[test]
    fn late_close_records_supplier_performance() {
        let f = fixture();
        let svc = receiving(&f);
        let product_id = f.product("DUCT-8");
        let order_id = f.draft(0, Some(date(3)));
        let line_id = f.line(order_id, product_id, 10, dec!(2));
        f.send(order_id);
        svc.receive_line_item(receive(f.business_id, order_id, line_id, 8, None, 9), None)
            .unwrap();

        let closed = f
            .procurement
            .close(ClosePurchaseOrder {
                business_id: f.business_id,
                order_id,
                occurred_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(closed.order.status(), PurchaseOrderStatus::Closed);

        let supplier = f.procurement.supplier(f.business_id, f.supplier_id).unwrap();
        assert_eq!(supplier.performance.orders_closed, 1);
        assert_eq!(supplier.performance.on_time_orders, 0);
        assert_eq!(supplier.performance.quality_score, dec!(80));
        assert_eq!(supplier.performance.performance_grade, Some(PerformanceGrade::F));
        assert_eq!(
            f.procurement.purchase_order(f.business_id, order_id).unwrap().status,
            PurchaseOrderStatus::Closed
        );
    }
}
