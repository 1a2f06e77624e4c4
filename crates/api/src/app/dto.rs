use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fieldstock_core::AggregateRoot;
use fieldstock_infra::Receipt;
use fieldstock_inventory::{Product, StockMovement};
use fieldstock_purchasing::{PurchaseOrder, PurchaseOrderLineItem, PurchaseOrderStatus, SupplierContact};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub costing_method: Option<String>,
    pub standard_cost: Option<Decimal>,
    #[serde(default)]
    pub reorder_point: i64,
    #[serde(default)]
    pub reorder_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct PostMovementRequest {
    pub movement_type: String,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    pub cost_lot: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub requires_approval: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReverseMovementRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecountRequest {
    pub counted_quantity: i64,
    #[serde(default)]
    pub requires_approval: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReorderSettingsRequest {
    pub reorder_point: i64,
    pub reorder_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CostingMethodRequest {
    pub costing_method: String,
    pub standard_cost: Option<Decimal>,
    /// Rebuild the cost basis even when the method does not change.
    #[serde(default)]
    pub recost: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSupplierRequest {
    pub name: String,
    #[serde(default)]
    pub contact: SupplierContact,
    pub payment_terms: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderLineRequest {
    pub product_id: String,
    pub description: Option<String>,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub supplier_id: String,
    pub order_number: String,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub required_approval_levels: u32,
    pub notes: Option<String>,
    #[serde(default)]
    pub lines: Vec<PurchaseOrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLineRequest {
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ChargesRequest {
    pub tax_rate: Decimal,
    #[serde(default)]
    pub shipping_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalAssignmentRequest {
    pub level: u32,
    pub approver_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitForApprovalRequest {
    pub assignments: Vec<ApprovalAssignmentRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmRequest {
    pub expected_delivery_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    pub received_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurchaseOrderQuery {
    pub status: Option<PurchaseOrderStatus>,
}

// -------------------------
// Response DTOs
// -------------------------

/// A product as of the revision a command produced.
#[derive(Debug, Serialize)]
pub struct ProductSnapshot {
    pub product_id: String,
    pub sku: String,
    pub version: u64,
    pub current_stock: i64,
    pub reserved_stock: i64,
    pub available_stock: i64,
    pub weighted_average_cost: Decimal,
    pub last_cost: Decimal,
    pub current_cost: Decimal,
    pub below_reorder_point: bool,
}

impl From<&Product> for ProductSnapshot {
    fn from(p: &Product) -> Self {
        Self {
            product_id: p.id_typed().to_string(),
            sku: p.sku().to_string(),
            version: p.version(),
            current_stock: p.current_stock(),
            reserved_stock: p.reserved_stock(),
            available_stock: p.available_stock(),
            weighted_average_cost: p.weighted_average_cost(),
            last_cost: p.last_cost(),
            current_cost: p.current_cost(),
            below_reorder_point: p.is_below_reorder_point(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PostingResponse {
    pub movement: Option<StockMovement>,
    pub product: ProductSnapshot,
}

/// A purchase order as of the revision a command produced.
#[derive(Debug, Serialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub order_number: String,
    pub version: u64,
    pub status: PurchaseOrderStatus,
    pub approval_status: String,
    pub current_approval_level: u32,
    pub required_approval_levels: u32,
    pub subtotal: Decimal,
    pub total_amount: Decimal,
    pub lines: Vec<PurchaseOrderLineItem>,
}

impl From<&PurchaseOrder> for OrderSnapshot {
    fn from(o: &PurchaseOrder) -> Self {
        let totals = o.totals();
        Self {
            order_id: o.id_typed().to_string(),
            order_number: o.order_number().to_string(),
            version: o.version(),
            status: o.status(),
            approval_status: o.approval_status().as_str().to_string(),
            current_approval_level: o.current_approval_level(),
            required_approval_levels: o.required_approval_levels(),
            subtotal: totals.subtotal,
            total_amount: totals.total_amount,
            lines: o.lines().to_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub order: OrderSnapshot,
    pub line: PurchaseOrderLineItem,
    pub is_fully_received: bool,
    pub quantity_remaining: i64,
    pub movement: StockMovement,
    pub product: ProductSnapshot,
}

impl From<&Receipt> for ReceiptResponse {
    fn from(r: &Receipt) -> Self {
        Self {
            order: OrderSnapshot::from(&r.order),
            line: r.line.clone(),
            is_fully_received: r.line.is_fully_received(),
            quantity_remaining: r.line.quantity_remaining(),
            movement: r.movement.clone(),
            product: ProductSnapshot::from(&r.product),
        }
    }
}
