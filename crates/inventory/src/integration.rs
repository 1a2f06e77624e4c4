//! Outbound notifications published after a committed stock change.

use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;

use fieldstock_core::BusinessId;

use crate::movement::MovementId;
use crate::product::{Product, ProductEvent, ProductId};

/// Published once per committed movement that changed stock.
///
/// Consumers use `below_reorder_point` (`current_stock <= reorder_point`) to
/// raise replenishment alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementPosted {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub quantity: i64,
    pub new_stock: i64,
    pub new_cost: Decimal,
    pub reorder_point: i64,
    pub below_reorder_point: bool,
}

impl StockMovementPosted {
    /// Notifications for `events`, stamped with the product state after they were applied.
    pub fn from_events(product: &Product, events: &[ProductEvent]) -> Vec<Self> {
        let Some(business_id) = product.business_id() else {
            return Vec::new();
        };
        events
            .iter()
            .filter_map(ProductEvent::stock_change)
            .map(|(movement_id, quantity)| Self {
                business_id,
                product_id: product.id_typed(),
                movement_id,
                quantity,
                new_stock: product.current_stock(),
                new_cost: product.current_cost(),
                reorder_point: product.reorder_point(),
                below_reorder_point: product.is_below_reorder_point(),
            })
            .collect()
    }
}
