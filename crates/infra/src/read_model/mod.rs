//! Business-isolated read model storage abstractions.

pub mod business_store;

pub use business_store::{BusinessStore, InMemoryBusinessStore};
