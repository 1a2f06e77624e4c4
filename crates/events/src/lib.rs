//! Event primitives shared by the domain and infra crates.
//!
//! Domain events are facts emitted by aggregates; envelopes add the stream
//! metadata (business, aggregate, revision) used for persistence and fan-out.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
