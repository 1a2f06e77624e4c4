//! Procurement: suppliers, purchase order editing, approval chain, dispatch
//! to the supplier, cancellation and close.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use fieldstock_core::{AggregateId, AggregateRoot, BusinessId, DomainError};
use fieldstock_events::{EventBus, EventEnvelope};
use fieldstock_inventory::{Product, ProductId};
use fieldstock_purchasing::{
    AddLineItem, ApprovePurchaseOrder, CancelPurchaseOrder, ClosePurchaseOrder,
    ConfirmPurchaseOrder, CreatePurchaseOrder, PurchaseOrder, PurchaseOrderCommand,
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus, RecordOrderPerformance,
    RegisterSupplier, RejectPurchaseOrder, RemoveLineItem, SendPurchaseOrder, SetCharges,
    SubmitForApproval, Supplier, SupplierCommand, SupplierId, UpdateLineItem,
};

use super::{Backend, log_rejection};
use crate::command_dispatcher::{DispatchError, Dispatched, UnitOfWork};
use crate::event_store::EventStore;
use crate::projections::{PurchaseOrderReadModel, SupplierReadModel};

/// A closed order and the supplier whose metrics the close updated.
#[derive(Debug)]
pub struct ClosedOrder {
    pub order: PurchaseOrder,
    pub supplier: Supplier,
}

#[derive(Debug)]
pub struct ProcurementService<S, B> {
    backend: Arc<Backend<S, B>>,
}

impl<S, B> Clone for ProcurementService<S, B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<S, B> ProcurementService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(backend: Arc<Backend<S, B>>) -> Self {
        Self { backend }
    }

    fn execute(
        &self,
        operation: &'static str,
        business_id: BusinessId,
        order_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
    ) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        let dispatched = self
            .backend
            .dispatcher()
            .dispatch(
                business_id,
                order_id.0,
                PurchaseOrder::AGGREGATE_TYPE,
                command,
                |id| PurchaseOrder::empty(PurchaseOrderId::new(id)),
            )
            .map_err(|e| log_rejection(operation, e))?;

        self.backend.project(business_id, &dispatched.stored);
        info!(
            operation,
            version = dispatched.aggregate.version(),
            status = dispatched.aggregate.status().as_str(),
            approval_status = dispatched.aggregate.approval_status().as_str(),
            "purchase order command committed"
        );
        Ok(dispatched)
    }

    /// Fail with `NotFound` unless the aggregate stream exists in this business.
    fn require_stream<A>(
        &self,
        operation: &'static str,
        business_id: BusinessId,
        aggregate_id: AggregateId,
        make: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: fieldstock_core::Aggregate<Error = DomainError>,
        A::Event: serde::de::DeserializeOwned,
    {
        let loaded = self
            .backend
            .dispatcher()
            .load(business_id, aggregate_id, make)
            .map_err(|e| log_rejection(operation, e))?;
        if !loaded.exists() {
            return Err(log_rejection(operation, DomainError::not_found().into()));
        }
        Ok(loaded.into_parts().0)
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, supplier_id = %cmd.supplier_id))]
    pub fn register_supplier(&self, cmd: RegisterSupplier) -> Result<Dispatched<Supplier>, DispatchError> {
        let business_id = cmd.business_id;
        let dispatched = self
            .backend
            .dispatcher()
            .dispatch(
                business_id,
                cmd.supplier_id.0,
                Supplier::AGGREGATE_TYPE,
                SupplierCommand::RegisterSupplier(cmd),
                |id| Supplier::empty(SupplierId::new(id)),
            )
            .map_err(|e| log_rejection("register_supplier", e))?;

        self.backend.project(business_id, &dispatched.stored);
        info!(name = dispatched.aggregate.name(), "supplier registered");
        Ok(dispatched)
    }

    /// Open a draft order against a registered supplier.
    #[instrument(
        skip(self, cmd),
        fields(business_id = %cmd.business_id, order_id = %cmd.order_id, supplier_id = %cmd.supplier_id)
    )]
    pub fn create_purchase_order(&self, cmd: CreatePurchaseOrder) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.require_stream("create_purchase_order", cmd.business_id, cmd.supplier_id.0, |id| {
            Supplier::empty(SupplierId::new(id))
        })?;
        self.execute(
            "create_purchase_order",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::CreatePurchaseOrder(cmd),
        )
    }

    /// Add a line for a catalog product.
    #[instrument(
        skip(self, cmd),
        fields(business_id = %cmd.business_id, order_id = %cmd.order_id, product_id = %cmd.product_id)
    )]
    pub fn add_line_item(&self, cmd: AddLineItem) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        let product = self.require_stream("add_line_item", cmd.business_id, cmd.product_id.0, |id| {
            Product::empty(ProductId::new(id))
        })?;
        if !product.is_active() {
            let err = DomainError::validation(format!("product {} is deactivated", product.sku()));
            return Err(log_rejection("add_line_item", err.into()));
        }
        self.execute(
            "add_line_item",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::AddLineItem(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id, line_id = %cmd.line_id))]
    pub fn update_line_item(&self, cmd: UpdateLineItem) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "update_line_item",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::UpdateLineItem(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id, line_id = %cmd.line_id))]
    pub fn remove_line_item(&self, cmd: RemoveLineItem) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "remove_line_item",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::RemoveLineItem(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id))]
    pub fn set_charges(&self, cmd: SetCharges) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "set_charges",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::SetCharges(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id))]
    pub fn submit_for_approval(&self, cmd: SubmitForApproval) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "submit_for_approval",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::SubmitForApproval(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id, approver_id = %cmd.approver_id))]
    pub fn approve(&self, cmd: ApprovePurchaseOrder) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "approve_purchase_order",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::ApprovePurchaseOrder(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id, approver_id = %cmd.approver_id))]
    pub fn reject(&self, cmd: RejectPurchaseOrder) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "reject_purchase_order",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::RejectPurchaseOrder(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id))]
    pub fn send(&self, cmd: SendPurchaseOrder) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "send_purchase_order",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::SendPurchaseOrder(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id))]
    pub fn confirm(&self, cmd: ConfirmPurchaseOrder) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "confirm_purchase_order",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::ConfirmPurchaseOrder(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id))]
    pub fn cancel(&self, cmd: CancelPurchaseOrder) -> Result<Dispatched<PurchaseOrder>, DispatchError> {
        self.execute(
            "cancel_purchase_order",
            cmd.business_id,
            cmd.order_id,
            PurchaseOrderCommand::CancelPurchaseOrder(cmd),
        )
    }

    /// Close a received (or short-received) order and fold its delivery
    /// figures into the supplier's metrics in the same commit.
    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, order_id = %cmd.order_id))]
    pub fn close(&self, cmd: ClosePurchaseOrder) -> Result<ClosedOrder, DispatchError> {
        let business_id = cmd.business_id;
        let dispatcher = self.backend.dispatcher();

        let mut order = dispatcher
            .load(business_id, cmd.order_id.0, |id| PurchaseOrder::empty(PurchaseOrderId::new(id)))
            .map_err(|e| log_rejection("close_purchase_order", e))?;
        let events = order
            .execute(&PurchaseOrderCommand::ClosePurchaseOrder(cmd.clone()))
            .map_err(|e| log_rejection("close_purchase_order", e))?;
        let closed = events
            .iter()
            .find_map(|e| match e {
                PurchaseOrderEvent::PurchaseOrderClosed(c) => Some(c.clone()),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("close produced no closing event"))?;

        let mut supplier = dispatcher
            .load(business_id, closed.supplier_id.0, |id| Supplier::empty(SupplierId::new(id)))
            .map_err(|e| log_rejection("close_purchase_order", e))?;
        supplier
            .execute(&SupplierCommand::RecordOrderPerformance(RecordOrderPerformance {
                business_id,
                supplier_id: closed.supplier_id,
                order_id: closed.order_id,
                delivered_on_time: closed.delivered_on_time,
                fill_rate: closed.fill_rate,
                occurred_at: cmd.occurred_at,
            }))
            .map_err(|e| log_rejection("close_purchase_order", e))?;

        let mut work = UnitOfWork::new(business_id);
        work.stage(PurchaseOrder::AGGREGATE_TYPE, &order)?;
        work.stage(Supplier::AGGREGATE_TYPE, &supplier)?;
        let stored = dispatcher
            .commit(work)
            .map_err(|e| log_rejection("close_purchase_order", e))?;
        self.backend.project(business_id, &stored);

        let (order, _) = order.into_parts();
        let (supplier, _) = supplier.into_parts();
        info!(
            supplier_id = %closed.supplier_id,
            delivered_on_time = closed.delivered_on_time,
            fill_rate = %closed.fill_rate,
            on_time_rate = %supplier.performance().on_time_delivery_rate,
            quality_score = %supplier.performance().quality_score,
            "purchase order closed"
        );
        Ok(ClosedOrder { order, supplier })
    }

    pub fn purchase_order(&self, business_id: BusinessId, order_id: PurchaseOrderId) -> Option<PurchaseOrderReadModel> {
        self.backend.read_models().purchase_orders.get(business_id, &order_id)
    }

    pub fn purchase_orders(
        &self,
        business_id: BusinessId,
        status: Option<PurchaseOrderStatus>,
    ) -> Vec<PurchaseOrderReadModel> {
        self.backend.read_models().purchase_orders.list(business_id, status)
    }

    pub fn orders_for_supplier(&self, business_id: BusinessId, supplier_id: SupplierId) -> Vec<PurchaseOrderReadModel> {
        self.backend
            .read_models()
            .purchase_orders
            .for_supplier(business_id, supplier_id)
    }

    pub fn supplier(&self, business_id: BusinessId, supplier_id: SupplierId) -> Option<SupplierReadModel> {
        self.backend.read_models().suppliers.get(business_id, &supplier_id)
    }

    pub fn suppliers(&self, business_id: BusinessId) -> Vec<SupplierReadModel> {
        self.backend.read_models().suppliers.list(business_id)
    }
}
