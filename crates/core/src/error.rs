//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is a deterministic business failure detected before any
/// write. Storage and transport failures live in the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A stock movement was rejected (zero quantity, wrong direction, overdraw).
    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    /// The movement has already been reversed.
    #[error("movement {0} has already been reversed")]
    AlreadyReversed(String),

    /// A purchase order cannot be sent because an approver rejected it.
    #[error("purchase order approval was rejected")]
    ApprovalRejected,

    /// A purchase order cannot be sent before every approval level clears.
    #[error("purchase order approval is still pending")]
    ApprovalPending,

    /// A receipt exceeds the quantity still open on a line item.
    #[error("over receipt: requested {requested}, only {remaining} remaining")]
    OverReceipt { requested: i64, remaining: i64 },

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (duplicate creation, stale revision).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_movement(msg: impl Into<String>) -> Self {
        Self::InvalidMovement(msg.into())
    }

    pub fn already_reversed(movement: impl core::fmt::Display) -> Self {
        Self::AlreadyReversed(movement.to_string())
    }

    pub fn over_receipt(requested: i64, remaining: i64) -> Self {
        Self::OverReceipt { requested, remaining }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
