//! Infrastructure layer: event store, dispatch, read models, application services.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod retry;
pub mod services;

mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched, Loaded, UnitOfWork};
pub use config::{Config, ConfigError, InventoryPolicy};
pub use retry::retry_on_conflict;
pub use services::{
    Backend, LedgerService, ProcurementService, ReadModels, Receipt, ReceivingService, RebuildError,
};
