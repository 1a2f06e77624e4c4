//! Stock movement model: the immutable rows of the stock ledger.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fieldstock_core::{DomainError, UserId, aggregate_id_newtype};

use crate::product::ProductId;

aggregate_id_newtype!(
    /// Identifier of one stock movement (one ledger row).
    MovementId
);

/// Reference type recorded on receipts posted by the receiving processor.
pub const REFERENCE_PURCHASE_ORDER: &str = "purchase_order";

/// Reference type recorded on compensating entries.
pub const REFERENCE_REVERSAL: &str = "reversal";

/// Kind of stock change a movement records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    Sale,
    Adjustment,
    Transfer,
    Return,
    ReturnToSupplier,
    Damage,
    Shrinkage,
    Production,
    Consumption,
    InitialStock,
    Recount,
}

/// Sign a movement type's quantity must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementDirection {
    Inbound,
    Outbound,
    Either,
}

impl MovementType {
    pub const ALL: [MovementType; 12] = [
        MovementType::Purchase,
        MovementType::Sale,
        MovementType::Adjustment,
        MovementType::Transfer,
        MovementType::Return,
        MovementType::ReturnToSupplier,
        MovementType::Damage,
        MovementType::Shrinkage,
        MovementType::Production,
        MovementType::Consumption,
        MovementType::InitialStock,
        MovementType::Recount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Sale => "sale",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
            MovementType::Return => "return",
            MovementType::ReturnToSupplier => "return_to_supplier",
            MovementType::Damage => "damage",
            MovementType::Shrinkage => "shrinkage",
            MovementType::Production => "production",
            MovementType::Consumption => "consumption",
            MovementType::InitialStock => "initial_stock",
            MovementType::Recount => "recount",
        }
    }

    pub fn direction(&self) -> MovementDirection {
        match self {
            MovementType::Purchase
            | MovementType::Return
            | MovementType::Production
            | MovementType::InitialStock => MovementDirection::Inbound,
            MovementType::Sale
            | MovementType::ReturnToSupplier
            | MovementType::Damage
            | MovementType::Shrinkage
            | MovementType::Consumption => MovementDirection::Outbound,
            MovementType::Adjustment | MovementType::Transfer | MovementType::Recount => {
                MovementDirection::Either
            }
        }
    }

    /// Depletive types must carry a negative quantity and may not overdraw stock.
    pub fn is_depletive(&self) -> bool {
        self.direction() == MovementDirection::Outbound
    }

    /// Check the sign of `quantity` against this type's direction.
    pub fn check_quantity(&self, quantity: i64) -> Result<(), DomainError> {
        if quantity == 0 {
            return Err(DomainError::invalid_movement("quantity cannot be zero"));
        }
        match self.direction() {
            MovementDirection::Inbound if quantity < 0 => Err(DomainError::invalid_movement(
                format!("{} movements must increase stock", self.as_str()),
            )),
            MovementDirection::Outbound if quantity > 0 => Err(DomainError::invalid_movement(
                format!("{} movements must decrease stock", self.as_str()),
            )),
            _ => Ok(()),
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// Optional link from a movement to the document that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub reference_type: String,
    pub reference_id: Option<Uuid>,
}

impl MovementReference {
    pub fn new(reference_type: impl Into<String>, reference_id: Option<Uuid>) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id,
        }
    }

    pub fn purchase_order(order_id: Uuid) -> Self {
        Self::new(REFERENCE_PURCHASE_ORDER, Some(order_id))
    }

    pub fn reversal(original: MovementId) -> Self {
        Self::new(REFERENCE_REVERSAL, Some(*original.0.as_uuid()))
    }
}

/// One ledger row.
///
/// The body is fixed once written. Only the approval fields and the reversal
/// linkage change afterwards; for a movement awaiting approval the
/// before/after figures are re-stamped when the approval applies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub movement_id: MovementId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub cost_before: Decimal,
    pub cost_after: Decimal,
    /// Lot an outbound movement was told to draw from (specific identification).
    #[serde(default)]
    pub cost_lot: Option<MovementId>,
    pub reference: Option<MovementReference>,
    pub requires_approval: bool,
    pub is_approved: bool,
    pub approved_by: Option<UserId>,
    pub is_reversed: bool,
    /// Compensating entry, once this movement has been reversed.
    pub reversal_movement_id: Option<MovementId>,
    pub original_movement_id: Option<MovementId>,
    pub posted_by: Option<UserId>,
    pub notes: Option<String>,
    pub posted_at: DateTime<Utc>,
}

impl StockMovement {
    /// `quantity_after == quantity_before + quantity` and `total_cost == quantity * unit_cost`.
    pub fn is_balanced(&self) -> bool {
        self.quantity_before.checked_add(self.quantity) == Some(self.quantity_after)
            && fieldstock_core::money::extend(self.quantity, self.unit_cost) == Some(self.total_cost)
    }

    /// Applied to stock: either no approval was needed or it was granted.
    pub fn is_effective(&self) -> bool {
        !self.requires_approval || self.is_approved
    }

    pub fn is_reversal(&self) -> bool {
        self.original_movement_id.is_some()
    }

    pub fn reference_type(&self) -> Option<&str> {
        self.reference.as_ref().map(|r| r.reference_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_movement_types_case_and_dash_insensitively() {
        assert_eq!("Sale".parse::<MovementType>().unwrap(), MovementType::Sale);
        assert_eq!(
            "return-to-supplier".parse::<MovementType>().unwrap(),
            MovementType::ReturnToSupplier
        );
        assert!("teleport".parse::<MovementType>().is_err());
    }

    #[test]
    fn depletive_types_reject_positive_quantities() {
        assert!(MovementType::Sale.check_quantity(-3).is_ok());
        match MovementType::Sale.check_quantity(3) {
            Err(DomainError::InvalidMovement(_)) => {}
            other => panic!("expected invalid movement, got {other:?}"),
        }
        assert!(MovementType::Purchase.check_quantity(-1).is_err());
    }

    #[test]
    fn zero_quantity_is_rejected_for_every_type() {
        for t in MovementType::ALL {
            assert!(matches!(t.check_quantity(0), Err(DomainError::InvalidMovement(_))));
        }
    }

    #[test]
    fn adjustments_accept_either_sign() {
        assert!(MovementType::Adjustment.check_quantity(5).is_ok());
        assert!(MovementType::Adjustment.check_quantity(-5).is_ok());
        assert!(!MovementType::Recount.is_depletive());
    }
}
