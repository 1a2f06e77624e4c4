//! Application services: the explicit operations that replace trigger chains.
//!
//! Each operation loads the aggregates it touches, decides, and commits in
//! one atomic append. Read models are then brought up to date from the
//! committed streams before the call returns, and stock changes are
//! announced on the notification bus.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use fieldstock_core::{AggregateId, BusinessId};
use fieldstock_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use fieldstock_inventory::{MovementId, Product, ProductEvent, ProductId, StockMovementPosted};
use fieldstock_purchasing::{PurchaseOrderId, SupplierId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::InventoryPolicy;
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::projections::{
    LedgerEntry, ProductCatalogProjection, ProductReadModel, ProjectionError, PurchaseOrderReadModel,
    PurchaseOrdersProjection, StockLedgerProjection, SupplierReadModel, SuppliersProjection,
};
use crate::read_model::InMemoryBusinessStore;

pub mod ledger;
pub mod procurement;
pub mod receiving;

pub use ledger::LedgerService;
pub use procurement::ProcurementService;
pub use receiving::{Receipt, ReceivingService};

type Store<K, V> = Arc<InMemoryBusinessStore<K, V>>;

/// The in-memory read models served to queries.
#[derive(Debug)]
pub struct ReadModels {
    pub products: ProductCatalogProjection<Store<ProductId, ProductReadModel>>,
    pub ledger: StockLedgerProjection<Store<MovementId, LedgerEntry>>,
    pub purchase_orders: PurchaseOrdersProjection<Store<PurchaseOrderId, PurchaseOrderReadModel>>,
    pub suppliers: SuppliersProjection<Store<SupplierId, SupplierReadModel>>,
}

impl ReadModels {
    pub fn in_memory() -> Self {
        Self {
            products: ProductCatalogProjection::new(Arc::new(InMemoryBusinessStore::new())),
            ledger: StockLedgerProjection::new(Arc::new(InMemoryBusinessStore::new())),
            purchase_orders: PurchaseOrdersProjection::new(Arc::new(InMemoryBusinessStore::new())),
            suppliers: SuppliersProjection::new(Arc::new(InMemoryBusinessStore::new())),
        }
    }

    /// Route one envelope to every projection (each ignores foreign stream types).
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.products.apply_envelope(envelope)?;
        self.ledger.apply_envelope(envelope)?;
        self.purchase_orders.apply_envelope(envelope)?;
        self.suppliers.apply_envelope(envelope)?;
        Ok(())
    }

    pub fn rebuild(&self, business_id: BusinessId, envelopes: Vec<EventEnvelope<JsonValue>>) -> Result<(), ProjectionError> {
        self.products.rebuild(business_id, envelopes.iter().cloned())?;
        self.ledger.rebuild(business_id, envelopes.iter().cloned())?;
        self.purchase_orders.rebuild(business_id, envelopes.iter().cloned())?;
        self.suppliers.rebuild(business_id, envelopes)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Shared wiring behind the services: dispatcher, read models, notifications, policy.
#[derive(Debug)]
pub struct Backend<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    read_models: ReadModels,
    notifications: InMemoryEventBus<StockMovementPosted>,
    policy: InventoryPolicy,
    /// Serializes SKU checks with product creation.
    catalog_guard: Mutex<()>,
}

impl<S, B> Backend<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, policy: InventoryPolicy) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            read_models: ReadModels::in_memory(),
            notifications: InMemoryEventBus::new(),
            policy,
            catalog_guard: Mutex::new(()),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn read_models(&self) -> &ReadModels {
        &self.read_models
    }

    pub fn policy(&self) -> &InventoryPolicy {
        &self.policy
    }

    pub(crate) fn lock_catalog(&self) -> Result<MutexGuard<'_, ()>, DispatchError> {
        self.catalog_guard
            .lock()
            .map_err(|_| DispatchError::Store(EventStoreError::Unavailable("catalog lock poisoned".to_string())))
    }

    /// Stock-change notifications (reorder alerts and reporting).
    pub fn subscribe_notifications(&self) -> Subscription<StockMovementPosted> {
        self.notifications.subscribe()
    }

    /// Bring read models up to date with the streams a commit touched.
    ///
    /// Each touched stream is replayed from the store; cursors skip what was
    /// already projected, so concurrent callers never leave gaps. Failures are
    /// logged: the commit itself already succeeded.
    pub(crate) fn project(&self, business_id: BusinessId, committed: &[StoredEvent]) {
        let streams: BTreeSet<AggregateId> = committed.iter().map(|e| e.aggregate_id).collect();
        for aggregate_id in streams {
            let history = match self.dispatcher.store().load_stream(business_id, aggregate_id) {
                Ok(h) => h,
                Err(e) => {
                    warn!(%business_id, %aggregate_id, error = %e, "projection catch-up could not load stream");
                    continue;
                }
            };
            for stored in &history {
                if let Err(e) = self.read_models.apply_envelope(&stored.to_envelope()) {
                    warn!(
                        %business_id,
                        %aggregate_id,
                        sequence_number = stored.sequence_number,
                        error = %e,
                        "projection failed"
                    );
                    break;
                }
            }
        }
    }

    pub(crate) fn notify(&self, product: &Product, events: &[ProductEvent]) {
        for note in StockMovementPosted::from_events(product, events) {
            info!(
                business_id = %note.business_id,
                product_id = %note.product_id,
                movement_id = %note.movement_id,
                quantity = note.quantity,
                new_stock = note.new_stock,
                below_reorder_point = note.below_reorder_point,
                "stock movement posted"
            );
            if let Err(e) = self.notifications.publish(note) {
                warn!(error = ?e, "stock notification dropped");
            }
        }
    }

    /// Rebuild every read model of a business from its event history.
    pub fn rebuild_read_models(&self, business_id: BusinessId) -> Result<(), RebuildError> {
        let history = self.dispatcher.store().load_business(business_id)?;
        let envelopes = history.iter().map(StoredEvent::to_envelope).collect();
        self.read_models.rebuild(business_id, envelopes)?;
        info!(%business_id, events = history.len(), "read models rebuilt");
        Ok(())
    }
}

/// Log a rejected command at `warn` and pass the error through.
pub(crate) fn log_rejection(operation: &'static str, err: DispatchError) -> DispatchError {
    warn!(operation, error = %err, retryable = err.is_retryable(), "command rejected");
    err
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::event_store::InMemoryEventStore;

    pub type TestStore = Arc<InMemoryEventStore>;
    pub type TestBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    pub type TestBackend = Backend<TestStore, TestBus>;

    pub fn backend(policy: InventoryPolicy) -> Arc<TestBackend> {
        Arc::new(Backend::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            policy,
        ))
    }
}
