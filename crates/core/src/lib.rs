//! `fieldstock-core` — domain foundation building blocks.
//!
//! Pure domain primitives shared by the ledger and procurement crates
//! (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, BusinessId, UserId};
