//! Service wiring for the HTTP layer: one in-memory backend shared by the
//! ledger, procurement and receiving services.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use fieldstock_events::{EventEnvelope, InMemoryEventBus};
use fieldstock_infra::event_store::InMemoryEventStore;
use fieldstock_infra::{
    Backend, Config, DispatchError, LedgerService, ProcurementService, ReceivingService, retry_on_conflict,
};

pub type Store = Arc<InMemoryEventStore>;
pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

#[derive(Debug)]
pub struct AppServices {
    backend: Arc<Backend<Store, Bus>>,
    pub ledger: LedgerService<Store, Bus>,
    pub procurement: ProcurementService<Store, Bus>,
    pub receiving: ReceivingService<Store, Bus>,
    conflict_retries: u32,
}

pub fn build_services(config: &Config) -> AppServices {
    let backend = Arc::new(Backend::new(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        config.policy.clone(),
    ));

    AppServices {
        ledger: LedgerService::new(backend.clone()),
        procurement: ProcurementService::new(backend.clone()),
        receiving: ReceivingService::new(backend.clone()),
        backend,
        conflict_retries: config.conflict_retries,
    }
}

impl AppServices {
    pub fn backend(&self) -> &Backend<Store, Bus> {
        &self.backend
    }

    /// Run a whole operation, re-running it on concurrent modification up to
    /// the configured number of times.
    pub fn run<T>(&self, operation: impl FnMut() -> Result<T, DispatchError>) -> Result<T, DispatchError> {
        retry_on_conflict(self.conflict_retries, operation)
    }
}
