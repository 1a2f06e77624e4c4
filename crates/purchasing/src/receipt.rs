//! Receipt bookkeeping: line completion, order status derivation, fill rate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fieldstock_core::money::{checked_sum, extend, round_money};
use fieldstock_core::{DomainError, DomainResult};
use fieldstock_inventory::ProductId;

use crate::order::{LineItemId, PurchaseOrderStatus};

/// Purchase order line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineItem {
    pub line_id: LineItemId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub description: Option<String>,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    pub unit_cost: Decimal,
}

impl PurchaseOrderLineItem {
    /// Always `quantity_ordered - quantity_received`.
    pub fn quantity_remaining(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_remaining() <= 0
    }

    /// `None` when the extension does not fit in a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        extend(self.quantity_ordered, self.unit_cost).map(round_money)
    }

    /// Validate a receipt of `quantity` against what is still open.
    pub fn check_receipt(&self, quantity: i64) -> Result<(), DomainError> {
        let remaining = self.quantity_remaining();
        if quantity <= 0 || quantity > remaining {
            return Err(DomainError::over_receipt(quantity, remaining));
        }
        Ok(())
    }
}

/// Status after a receipt: `received` when every line is complete,
/// `partially_received` when anything has arrived, otherwise unchanged.
pub fn derive_status(lines: &[PurchaseOrderLineItem], current: PurchaseOrderStatus) -> PurchaseOrderStatus {
    if !lines.is_empty() && lines.iter().all(PurchaseOrderLineItem::is_fully_received) {
        PurchaseOrderStatus::Received
    } else if lines.iter().any(|l| l.quantity_received > 0) {
        PurchaseOrderStatus::PartiallyReceived
    } else {
        current
    }
}

/// Received over ordered, as a percentage with two decimals.
pub fn fill_rate(lines: &[PurchaseOrderLineItem]) -> Decimal {
    let ordered: i128 = lines.iter().map(|l| i128::from(l.quantity_ordered)).sum();
    if ordered <= 0 {
        return Decimal::ZERO;
    }
    let received: i128 = lines
        .iter()
        .map(|l| i128::from(l.quantity_received.min(l.quantity_ordered)))
        .sum();
    round_money(Decimal::from(received) * Decimal::ONE_HUNDRED / Decimal::from(ordered))
}

/// Monetary totals derived from line items and charges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub total_amount: Decimal,
}

impl OrderTotals {
    /// Fails with `Validation` when any amount overflows.
    pub fn compute(lines: &[PurchaseOrderLineItem], tax_rate: Decimal, shipping_amount: Decimal) -> DomainResult<Self> {
        let out_of_range = || DomainError::validation("purchase order amounts are out of range");
        let line_totals = lines
            .iter()
            .map(PurchaseOrderLineItem::line_total)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(out_of_range)?;
        let subtotal = checked_sum(line_totals).ok_or_else(out_of_range)?;
        let tax_amount = round_money(subtotal.checked_mul(tax_rate).ok_or_else(out_of_range)?);
        let shipping_amount = round_money(shipping_amount);
        let total_amount = checked_sum([subtotal, tax_amount, shipping_amount]).ok_or_else(out_of_range)?;
        Ok(Self {
            subtotal,
            tax_amount,
            shipping_amount,
            total_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(ordered: i64, received: i64, cost: Decimal) -> PurchaseOrderLineItem {
        PurchaseOrderLineItem {
            line_id: LineItemId::generate(),
            line_no: 1,
            product_id: ProductId::generate(),
            description: None,
            quantity_ordered: ordered,
            quantity_received: received,
            unit_cost: cost,
        }
    }

    #[test]
    fn over_receipt_reports_what_remains() {
        let l = line(10, 6, dec!(1));
        assert_eq!(l.check_receipt(5), Err(DomainError::over_receipt(5, 4)));
        assert!(l.check_receipt(4).is_ok());
        assert!(matches!(l.check_receipt(0), Err(DomainError::OverReceipt { .. })));
    }

    #[test]
    fn status_follows_line_completion() {
        let sent = PurchaseOrderStatus::Sent;
        assert_eq!(derive_status(&[line(5, 0, dec!(1))], sent), sent);
        assert_eq!(
            derive_status(&[line(5, 5, dec!(1)), line(5, 1, dec!(1))], sent),
            PurchaseOrderStatus::PartiallyReceived
        );
        assert_eq!(
            derive_status(&[line(5, 5, dec!(1)), line(2, 2, dec!(1))], sent),
            PurchaseOrderStatus::Received
        );
    }

    #[test]
    fn totals_apply_tax_and_shipping() {
        let totals = OrderTotals::compute(
            &[line(3, 0, dec!(10.00)), line(2, 0, dec!(2.50))],
            dec!(0.0825),
            dec!(15),
        )
        .unwrap();
        assert_eq!(totals.subtotal, dec!(35.00));
        assert_eq!(totals.tax_amount, dec!(2.89));
        assert_eq!(totals.total_amount, dec!(52.89));
    }

    #[test]
    fn totals_report_overflow_as_validation() {
        let huge = line(i64::MAX, 0, Decimal::MAX);
        assert_eq!(huge.line_total(), None);
        assert!(matches!(
            OrderTotals::compute(&[huge], dec!(0), dec!(0)),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            OrderTotals::compute(&[line(1, 0, dec!(1))], dec!(0), Decimal::MAX),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn fill_rate_is_a_percentage() {
        assert_eq!(fill_rate(&[line(10, 6, dec!(1)), line(10, 10, dec!(1))]), dec!(80));
        assert_eq!(fill_rate(&[]), dec!(0));
    }

    proptest! {
        #[test]
        fn remaining_tracks_ordered_minus_received(ordered in 1i64..1_000, received in 0i64..1_000) {
            let l = line(ordered, received.min(ordered), dec!(1));
            prop_assert_eq!(l.quantity_remaining(), l.quantity_ordered - l.quantity_received);
            prop_assert_eq!(l.is_fully_received(), l.quantity_remaining() <= 0);
        }
    }
}
