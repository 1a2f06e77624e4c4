//! Stock ledger operations: catalog entries, postings, approvals, reversals.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use fieldstock_core::{AggregateRoot, BusinessId, DomainError};
use fieldstock_events::{EventBus, EventEnvelope};
use fieldstock_inventory::{
    ApproveMovement, ChangeCostingMethod, CreateProduct, DeactivateProduct, MovementId, PostMovement,
    Product, ProductCommand, ProductEvent, ProductId, RecountStock, ReleaseReservation, ReserveStock,
    ReverseMovement, StockMovement, UpdateReorderSettings,
};

use super::{Backend, log_rejection};
use crate::command_dispatcher::{DispatchError, Dispatched};
use crate::event_store::EventStore;
use crate::projections::{LedgerEntry, ProductReadModel};

/// The row a posting wrote, if it wrote one.
pub fn written_movement(events: &[ProductEvent]) -> Option<&StockMovement> {
    events.iter().find_map(|e| match e {
        ProductEvent::MovementPosted(e) => Some(&e.movement),
        ProductEvent::MovementReversed(e) => Some(&e.reversal),
        _ => None,
    })
}

#[derive(Debug)]
pub struct LedgerService<S, B> {
    backend: Arc<Backend<S, B>>,
}

impl<S, B> Clone for LedgerService<S, B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<S, B> LedgerService<S, B>
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
        product_id: ProductId,
        command: ProductCommand,
    ) -> Result<Dispatched<Product>, DispatchError> {
        let dispatched = self
            .backend
            .dispatcher()
            .dispatch(business_id, product_id.0, Product::AGGREGATE_TYPE, command, |id| {
                Product::empty(ProductId::new(id))
            })
            .map_err(|e| log_rejection(operation, e))?;

        self.backend.project(business_id, &dispatched.stored);
        self.backend.notify(&dispatched.aggregate, &dispatched.events);
        info!(
            operation,
            version = dispatched.aggregate.version(),
            current_stock = dispatched.aggregate.current_stock(),
            "ledger command committed"
        );
        Ok(dispatched)
    }

    /// Create a catalog entry; SKUs are unique per business.
    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id, sku = %cmd.sku))]
    pub fn create_product(&self, cmd: CreateProduct) -> Result<Dispatched<Product>, DispatchError> {
        let _guard = self.backend.lock_catalog()?;

        if let Some(existing) = self.backend.read_models().products.find_by_sku(cmd.business_id, &cmd.sku) {
            let err = DomainError::conflict(format!(
                "sku '{}' is already used by product {}",
                existing.sku, existing.product_id
            ));
            return Err(log_rejection("create_product", err.into()));
        }

        self.execute(
            "create_product",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::CreateProduct(cmd),
        )
    }

    /// Post a movement. Types named in the policy are written pending approval.
    #[instrument(
        skip(self, cmd),
        fields(
            business_id = %cmd.business_id,
            product_id = %cmd.product_id,
            movement_id = %cmd.movement_id,
            movement_type = %cmd.movement_type,
            quantity = cmd.quantity,
        )
    )]
    pub fn post_movement(&self, mut cmd: PostMovement) -> Result<Dispatched<Product>, DispatchError> {
        cmd.requires_approval |= self.backend.policy().requires_approval(cmd.movement_type);
        self.execute(
            "post_movement",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::PostMovement(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id, movement_id = %cmd.movement_id))]
    pub fn approve_movement(&self, cmd: ApproveMovement) -> Result<Dispatched<Product>, DispatchError> {
        self.execute(
            "approve_movement",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::ApproveMovement(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id, movement_id = %cmd.movement_id))]
    pub fn reverse_movement(&self, cmd: ReverseMovement) -> Result<Dispatched<Product>, DispatchError> {
        self.execute(
            "reverse_movement",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::ReverseMovement(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id, counted = cmd.counted_quantity))]
    pub fn recount_stock(&self, mut cmd: RecountStock) -> Result<Dispatched<Product>, DispatchError> {
        cmd.requires_approval |= self
            .backend
            .policy()
            .requires_approval(fieldstock_inventory::MovementType::Recount);
        self.execute(
            "recount_stock",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::RecountStock(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id, quantity = cmd.quantity))]
    pub fn reserve_stock(&self, cmd: ReserveStock) -> Result<Dispatched<Product>, DispatchError> {
        self.execute(
            "reserve_stock",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::ReserveStock(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id, quantity = cmd.quantity))]
    pub fn release_reservation(&self, cmd: ReleaseReservation) -> Result<Dispatched<Product>, DispatchError> {
        self.execute(
            "release_reservation",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::ReleaseReservation(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id))]
    pub fn update_reorder_settings(&self, cmd: UpdateReorderSettings) -> Result<Dispatched<Product>, DispatchError> {
        self.execute(
            "update_reorder_settings",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::UpdateReorderSettings(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id, method = %cmd.costing_method))]
    pub fn change_costing_method(&self, cmd: ChangeCostingMethod) -> Result<Dispatched<Product>, DispatchError> {
        self.execute(
            "change_costing_method",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::ChangeCostingMethod(cmd),
        )
    }

    #[instrument(skip(self, cmd), fields(business_id = %cmd.business_id, product_id = %cmd.product_id))]
    pub fn deactivate_product(&self, cmd: DeactivateProduct) -> Result<Dispatched<Product>, DispatchError> {
        self.execute(
            "deactivate_product",
            cmd.business_id,
            cmd.product_id,
            ProductCommand::DeactivateProduct(cmd),
        )
    }

    pub fn product(&self, business_id: BusinessId, product_id: ProductId) -> Option<ProductReadModel> {
        self.backend.read_models().products.get(business_id, &product_id)
    }

    pub fn products(&self, business_id: BusinessId) -> Vec<ProductReadModel> {
        self.backend.read_models().products.list(business_id)
    }

    pub fn reorder_candidates(&self, business_id: BusinessId) -> Vec<ProductReadModel> {
        self.backend.read_models().products.reorder_candidates(business_id)
    }

    pub fn movement(&self, business_id: BusinessId, movement_id: MovementId) -> Option<LedgerEntry> {
        self.backend.read_models().ledger.movement(business_id, &movement_id)
    }

    pub fn movements_for_product(&self, business_id: BusinessId, product_id: ProductId) -> Vec<LedgerEntry> {
        self.backend
            .read_models()
            .ledger
            .movements_for_product(business_id, product_id)
    }

    pub fn replay_stock(&self, business_id: BusinessId, product_id: ProductId) -> i64 {
        self.backend.read_models().ledger.replay_stock(business_id, product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use fieldstock_core::UserId;
    use fieldstock_inventory::{CostingMethod, MovementType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::config::InventoryPolicy;
    use crate::services::test_support::{TestBackend, TestBus, TestStore, backend};

    fn service(policy: InventoryPolicy) -> (LedgerService<TestStore, TestBus>, Arc<TestBackend>) {
        let backend = backend(policy);
        (LedgerService::new(backend.clone()), backend)
    }

    fn create(sku: &str, business_id: BusinessId) -> CreateProduct {
        CreateProduct {
            business_id,
            product_id: ProductId::generate(),
            sku: sku.to_string(),
            name: format!("Part {sku}"),
            costing_method: CostingMethod::WeightedAverage,
            standard_cost: None,
            reorder_point: 5,
            reorder_quantity: 20,
            occurred_at: Utc::now(),
        }
    }

    fn post(business_id: BusinessId, product_id: ProductId, movement_type: MovementType, quantity: i64, cost: Decimal) -> PostMovement {
        PostMovement {
            business_id,
            product_id,
            movement_id: MovementId::generate(),
            movement_type,
            quantity,
            unit_cost: Some(cost),
            cost_lot: None,
            reference: None,
            requires_approval: false,
            posted_by: None,
            notes: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn weighted_average_through_the_service_and_read_model() {
        let (ledger, _) = service(InventoryPolicy::default());
        let business_id = BusinessId::new();
        let product_id = ledger.create_product(create("TXV-3T", business_id)).unwrap().aggregate.id_typed();

        ledger.post_movement(post(business_id, product_id, MovementType::Purchase, 10, dec!(5))).unwrap();
        let second = ledger
            .post_movement(post(business_id, product_id, MovementType::Purchase, 10, dec!(7)))
            .unwrap();
        assert_eq!(second.aggregate.weighted_average_cost(), dec!(6));

        let rm = ledger.product(business_id, product_id).unwrap();
        assert_eq!(rm.current_stock, 20);
        assert_eq!(rm.weighted_average_cost, dec!(6));
        assert_eq!(ledger.replay_stock(business_id, product_id), 20);
        assert_eq!(ledger.movements_for_product(business_id, product_id).len(), 2);
    }

    #[test]
    fn sku_is_unique_per_business() {
        let (ledger, _) = service(InventoryPolicy::default());
        let business_id = BusinessId::new();
        ledger.create_product(create("CAP-45", business_id)).unwrap();

        let err = ledger.create_product(create("cap-45", business_id)).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));

        ledger.create_product(create("CAP-45", BusinessId::new())).unwrap();
    }

    #[test]
    fn policy_holds_configured_types_for_approval() {
        let (ledger, _) = service(InventoryPolicy::new([MovementType::Shrinkage]));
        let business_id = BusinessId::new();
        let product_id = ledger.create_product(create("FUSE-30", business_id)).unwrap().aggregate.id_typed();
        ledger.post_movement(post(business_id, product_id, MovementType::Purchase, 8, dec!(2))).unwrap();

        let shrink = post(business_id, product_id, MovementType::Shrinkage, -3, dec!(2));
        let movement_id = shrink.movement_id;
        let pending = ledger.post_movement(shrink).unwrap();
        assert_eq!(pending.aggregate.current_stock(), 8);
        assert!(written_movement(&pending.events).unwrap().requires_approval);

        let approved = ledger
            .approve_movement(ApproveMovement {
                business_id,
                product_id,
                movement_id,
                approver_id: UserId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(approved.aggregate.current_stock(), 5);
        assert!(ledger.movement(business_id, movement_id).unwrap().movement.is_approved);
        assert_eq!(ledger.replay_stock(business_id, product_id), 5);
    }

    #[test]
    fn committed_postings_announce_reorder_state() {
        let (ledger, backend) = service(InventoryPolicy::default());
        let notes = backend.subscribe_notifications();
        let business_id = BusinessId::new();
        let product_id = ledger.create_product(create("BLWR-MTR", business_id)).unwrap().aggregate.id_typed();

        ledger.post_movement(post(business_id, product_id, MovementType::Purchase, 9, dec!(120))).unwrap();
        ledger.post_movement(post(business_id, product_id, MovementType::Sale, -4, dec!(0))).unwrap();

        let received = notes.drain();
        assert_eq!(received.len(), 2);
        assert!(!received[0].below_reorder_point);
        assert_eq!(received[1].new_stock, 5);
        assert!(received[1].below_reorder_point);
        assert_eq!(ledger.reorder_candidates(business_id).len(), 1);
    }

    #[test]
    fn rejected_posting_changes_nothing() {
        let (ledger, backend) = service(InventoryPolicy::default());
        let notes = backend.subscribe_notifications();
        let business_id = BusinessId::new();
        let product_id = ledger.create_product(create("COIL-A", business_id)).unwrap().aggregate.id_typed();
        ledger.post_movement(post(business_id, product_id, MovementType::Purchase, 3, dec!(10))).unwrap();
        notes.drain();

        let err = ledger
            .post_movement(post(business_id, product_id, MovementType::Sale, -5, dec!(0)))
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidMovement(_))));
        assert_eq!(ledger.product(business_id, product_id).unwrap().current_stock, 3);
        assert_eq!(ledger.movements_for_product(business_id, product_id).len(), 1);
        assert!(notes.drain().is_empty());
    }
}
