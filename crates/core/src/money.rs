//! Decimal helpers for unit costs and monetary amounts.
//!
//! Quantities and unit costs are bounded by [`MAX_QUANTITY`] and
//! [`MAX_UNIT_COST`]; within those bounds every extension, sum and average
//! stays well inside `Decimal`'s range. Arithmetic on caller input still goes
//! through the checked helpers below.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Scale kept on unit costs (weighted averages, lot costs).
pub const COST_SCALE: u32 = 4;

/// Scale kept on monetary totals (order subtotal, tax, total).
pub const MONEY_SCALE: u32 = 2;

/// Largest absolute quantity a movement, line item or stock level may hold.
pub const MAX_QUANTITY: i64 = 1_000_000_000_000;

/// Largest unit cost (and standard cost) accepted: one billion.
pub const MAX_UNIT_COST: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Round a unit cost to [`COST_SCALE`] places, midpoints away from zero.
pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a monetary amount to [`MONEY_SCALE`] places.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `quantity * unit_cost`, exact (no rounding); `None` on overflow.
pub fn extend(quantity: i64, unit_cost: Decimal) -> Option<Decimal> {
    Decimal::from(quantity).checked_mul(unit_cost)
}

/// Checked sum of amounts; `None` on overflow.
pub fn checked_sum(amounts: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
}

/// `Validation` unless `|quantity| <= MAX_QUANTITY`.
pub fn check_quantity_bound(quantity: i64, what: &str) -> DomainResult<()> {
    if quantity.unsigned_abs() > MAX_QUANTITY.unsigned_abs() {
        return Err(DomainError::validation(format!(
            "{what} of {quantity} exceeds the limit of {MAX_QUANTITY}"
        )));
    }
    Ok(())
}

/// `Validation` unless `unit_cost <= MAX_UNIT_COST`.
pub fn check_cost_bound(unit_cost: Decimal, what: &str) -> DomainResult<()> {
    if unit_cost > MAX_UNIT_COST {
        return Err(DomainError::validation(format!(
            "{what} of {unit_cost} exceeds the limit of {MAX_UNIT_COST}"
        )));
    }
    Ok(())
}
