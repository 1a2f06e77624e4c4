//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - Published envelopes alone are enough to build the read models
//! - Tenant isolation is preserved
//! - Optimistic concurrency conflicts abort a multi-stream commit as a whole
//! - Rebuilding from history reproduces the incrementally maintained state

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use fieldstock_core::BusinessId;
    use fieldstock_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
    use fieldstock_inventory::{
        CostingMethod, CreateProduct, MovementId, MovementType, PostMovement, Product, ProductCommand,
        ProductId,
    };
    use fieldstock_purchasing::{
        AddLineItem, CreatePurchaseOrder, LineItemId, PurchaseOrderId, ReceiveLineItem,
        RegisterSupplier, SendPurchaseOrder, SupplierContact, SupplierId,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::config::InventoryPolicy;
    use crate::event_store::InMemoryEventStore;
    use crate::retry::retry_on_conflict;
    use crate::services::test_support::{TestBus, TestStore};
    use crate::services::{Backend, LedgerService, ProcurementService, ReadModels, ReceivingService};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    /// A dispatcher plus a subscription whose envelopes feed a separate set of read models.
    fn setup() -> (
        CommandDispatcher<Arc<InMemoryEventStore>, Bus>,
        Arc<ReadModels>,
        Subscription<EventEnvelope<JsonValue>>,
    ) {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let dispatcher = CommandDispatcher::new(store, bus);
        (dispatcher, Arc::new(ReadModels::in_memory()), sub)
    }

    /// Apply every envelope published so far; returns how many there were.
    ///
    /// Dispatch publishes before it returns, so the queue is complete here.
    fn wait_for_processing(sub: &Subscription<EventEnvelope<JsonValue>>, read_models: &ReadModels) -> usize {
        let published = sub.drain();
        for env in &published {
            read_models.apply_envelope(env).unwrap();
        }
        published.len()
    }

    fn create(business_id: BusinessId, product_id: ProductId, sku: &str) -> ProductCommand {
        ProductCommand::CreateProduct(CreateProduct {
            business_id,
            product_id,
            sku: sku.to_string(),
            name: sku.to_string(),
            costing_method: CostingMethod::Fifo,
            standard_cost: None,
            reorder_point: 2,
            reorder_quantity: 10,
            occurred_at: Utc::now(),
        })
    }

    fn post(business_id: BusinessId, product_id: ProductId, movement_type: MovementType, quantity: i64) -> ProductCommand {
        ProductCommand::PostMovement(PostMovement {
            business_id,
            product_id,
            movement_id: MovementId::generate(),
            movement_type,
            quantity,
            unit_cost: Some(dec!(3)),
            cost_lot: None,
            reference: None,
            requires_approval: false,
            posted_by: None,
            notes: None,
            occurred_at: Utc::now(),
        })
    }

    fn dispatch(
        dispatcher: &CommandDispatcher<Arc<InMemoryEventStore>, Bus>,
        business_id: BusinessId,
        product_id: ProductId,
        command: ProductCommand,
    ) -> Result<(), DispatchError> {
        dispatcher
            .dispatch(business_id, product_id.0, Product::AGGREGATE_TYPE, command, |id| {
                Product::empty(ProductId::new(id))
            })
            .map(|_| ())
    }

    #[test]
    fn published_envelopes_drive_catalog_and_ledger() {
        let (dispatcher, read_models, sub) = setup();
        let business_id = BusinessId::new();
        let product_id = ProductId::generate();

        dispatch(&dispatcher, business_id, product_id, create(business_id, product_id, "RLY-24V")).unwrap();
        for (movement_type, qty) in [
            (MovementType::Purchase, 5),
            (MovementType::Purchase, 10),
            (MovementType::Sale, -3),
            (MovementType::Adjustment, 7),
        ] {
            dispatch(&dispatcher, business_id, product_id, post(business_id, product_id, movement_type, qty)).unwrap();
        }
        assert!(wait_for_processing(&sub, &read_models) >= 5);

        let rm = read_models.products.get(business_id, &product_id).unwrap();
        assert_eq!(rm.current_stock, 19);
        assert_eq!(rm.available_stock, 19);
        assert_eq!(read_models.ledger.movements_for_product(business_id, product_id).len(), 4);
        assert_eq!(read_models.ledger.replay_stock(business_id, product_id), 19);
    }

    #[test]
    fn rejected_command_publishes_nothing() {
        let (dispatcher, read_models, sub) = setup();
        let business_id = BusinessId::new();
        let product_id = ProductId::generate();
        dispatch(&dispatcher, business_id, product_id, create(business_id, product_id, "CAP-5")).unwrap();
        assert_eq!(wait_for_processing(&sub, &read_models), 1);

        let err = dispatch(&dispatcher, business_id, product_id, post(business_id, product_id, MovementType::Sale, -1))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(_)));
        assert_eq!(wait_for_processing(&sub, &read_models), 0);

        assert_eq!(read_models.products.get(business_id, &product_id).unwrap().current_stock, 0);
        assert!(read_models.ledger.movements_for_product(business_id, product_id).is_empty());
    }

    #[test]
    fn tenant_isolation_preserved() {
        let (dispatcher, read_models, sub) = setup();
        let (first, second) = (BusinessId::new(), BusinessId::new());
        let (p1, p2) = (ProductId::generate(), ProductId::generate());

        dispatch(&dispatcher, first, p1, create(first, p1, "SAME-SKU")).unwrap();
        dispatch(&dispatcher, second, p2, create(second, p2, "SAME-SKU")).unwrap();
        assert_eq!(wait_for_processing(&sub, &read_models), 2);

        assert_eq!(read_models.products.list(first).len(), 1);
        assert_eq!(read_models.products.list(second).len(), 1);
        assert!(read_models.products.get(first, &p2).is_none());
        assert!(read_models.products.get(second, &p1).is_none());

        // A command naming another business is refused before anything is written.
        let err = dispatch(&dispatcher, first, p2, post(second, p2, MovementType::Purchase, 1)).unwrap_err();
        assert!(matches!(err, DispatchError::Domain(_)));
    }

    fn backend() -> Arc<Backend<TestStore, TestBus>> {
        crate::services::test_support::backend(InventoryPolicy::default())
    }

    struct Sent {
        business_id: BusinessId,
        order_id: PurchaseOrderId,
        line_id: LineItemId,
        product_id: ProductId,
    }

    fn sent_order(backend: &Arc<Backend<TestStore, TestBus>>, quantity: i64) -> Sent {
        let ledger = LedgerService::new(backend.clone());
        let procurement = ProcurementService::new(backend.clone());
        let business_id = BusinessId::new();
        let supplier_id = SupplierId::generate();
        let product_id = ProductId::generate();
        let order_id = PurchaseOrderId::generate();
        let line_id = LineItemId::generate();

        procurement
            .register_supplier(RegisterSupplier {
                business_id,
                supplier_id,
                name: "Metro Electric".to_string(),
                contact: SupplierContact::default(),
                payment_terms: None,
                occurred_at: Utc::now(),
            })
            .unwrap();
        dispatch_create(&ledger, business_id, product_id);
        procurement
            .create_purchase_order(CreatePurchaseOrder {
                business_id,
                order_id,
                supplier_id,
                order_number: "PO-7781".to_string(),
                order_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                expected_delivery_date: None,
                required_approval_levels: 0,
                notes: None,
                occurred_at: Utc::now(),
            })
            .unwrap();
        procurement
            .add_line_item(AddLineItem {
                business_id,
                order_id,
                line_id,
                product_id,
                description: Some("20A breaker".to_string()),
                quantity_ordered: quantity,
                unit_cost: dec!(8.50),
                occurred_at: Utc::now(),
            })
            .unwrap();
        procurement
            .send(SendPurchaseOrder {
                business_id,
                order_id,
                sent_by: None,
                occurred_at: Utc::now(),
            })
            .unwrap();

        Sent {
            business_id,
            order_id,
            line_id,
            product_id,
        }
    }

    fn dispatch_create(ledger: &LedgerService<TestStore, TestBus>, business_id: BusinessId, product_id: ProductId) {
        if let ProductCommand::CreateProduct(cmd) = create(business_id, product_id, "BRK-20A") {
            ledger.create_product(cmd).unwrap();
        }
    }

    fn receipt(s: &Sent, quantity: i64) -> ReceiveLineItem {
        ReceiveLineItem {
            business_id: s.business_id,
            order_id: s.order_id,
            line_id: s.line_id,
            quantity,
            unit_cost: None,
            movement_id: MovementId::generate(),
            received_on: NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn stale_receipt_commits_neither_stream() {
        let backend = backend();
        let s = sent_order(&backend, 10);
        let dispatcher = backend.dispatcher();

        // Load the order, then let another receipt land before committing.
        let mut stale = dispatcher
            .load(s.business_id, s.order_id.0, |id| {
                fieldstock_purchasing::PurchaseOrder::empty(PurchaseOrderId::new(id))
            })
            .unwrap();
        stale
            .execute(&fieldstock_purchasing::PurchaseOrderCommand::ReceiveLineItem(receipt(&s, 3)))
            .unwrap();
        let mut product = dispatcher
            .load(s.business_id, s.product_id.0, |id| Product::empty(ProductId::new(id)))
            .unwrap();
        product
            .execute(&post(s.business_id, s.product_id, MovementType::Purchase, 3))
            .unwrap();

        ReceivingService::new(backend.clone())
            .receive_line_item(receipt(&s, 4), None)
            .unwrap();

        let mut work = crate::command_dispatcher::UnitOfWork::new(s.business_id);
        work.stage(fieldstock_purchasing::PurchaseOrder::AGGREGATE_TYPE, &stale).unwrap();
        work.stage(Product::AGGREGATE_TYPE, &product).unwrap();
        let err = dispatcher.commit(work).unwrap_err();
        assert!(err.is_retryable());

        let ledger = LedgerService::new(backend.clone());
        assert_eq!(ledger.replay_stock(s.business_id, s.product_id), 4);
        let order = ProcurementService::new(backend.clone())
            .purchase_order(s.business_id, s.order_id)
            .unwrap();
        assert_eq!(order.lines[0].quantity_received, 4);
    }

    #[test]
    fn concurrent_receipts_never_overshoot_the_line() {
        let backend = backend();
        let s = Arc::new(sent_order(&backend, 12));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let receiving = ReceivingService::new(backend.clone());
                let s = s.clone();
                std::thread::spawn(move || {
                    retry_on_conflict(20, || receiving.receive_line_item(receipt(&s, 3), None)).is_ok()
                })
            })
            .collect();
        let accepted = handles.into_iter().map(|h| h.join().unwrap_or(false)).filter(|ok| *ok).count();
        assert_eq!(accepted, 4);

        let ledger = LedgerService::new(backend.clone());
        let product = ledger.product(s.business_id, s.product_id).unwrap();
        assert_eq!(product.current_stock, 12);
        assert_eq!(ledger.replay_stock(s.business_id, s.product_id), 12);

        let order = ProcurementService::new(backend.clone())
            .purchase_order(s.business_id, s.order_id)
            .unwrap();
        assert_eq!(order.lines[0].quantity_received, 12);
        assert!(order.lines[0].is_fully_received());

        let over = ReceivingService::new(backend.clone())
            .receive_line_item(receipt(&s, 1), None)
            .unwrap_err();
        assert!(!over.is_retryable());
    }

    #[test]
    fn rebuild_reproduces_incremental_read_models() {
        let backend = backend();
        let s = sent_order(&backend, 6);
        ReceivingService::new(backend.clone())
            .receive_line_item(receipt(&s, 2), None)
            .unwrap();

        let ledger = LedgerService::new(backend.clone());
        let procurement = ProcurementService::new(backend.clone());
        let product_before = ledger.product(s.business_id, s.product_id).unwrap();
        let order_before = procurement.purchase_order(s.business_id, s.order_id).unwrap();
        let movements_before = ledger.movements_for_product(s.business_id, s.product_id);

        backend.rebuild_read_models(s.business_id).unwrap();

        assert_eq!(ledger.product(s.business_id, s.product_id).unwrap(), product_before);
        assert_eq!(procurement.purchase_order(s.business_id, s.order_id).unwrap(), order_before);
        assert_eq!(ledger.movements_for_product(s.business_id, s.product_id), movements_before);
    }
}
