//! Purchasing domain module (event-sourced).
//!
//! Purchase order state machine with multi-level approval and partial
//! receiving, plus the supplier registry and its delivery metrics. Pure
//! domain logic: no IO, no HTTP, no storage.

pub mod approval;
pub mod order;
pub mod receipt;
pub mod supplier;

pub use approval::{ApprovalAssignment, ApprovalDecision, ApprovalStatus, PurchaseOrderApproval};
pub use order::{
    AddLineItem, ApprovalDenied, ApprovalGranted, ApprovePurchaseOrder, CancelPurchaseOrder,
    ChargesSet, ClosePurchaseOrder, ConfirmPurchaseOrder, CreatePurchaseOrder, LineItemAdded,
    LineItemId, LineItemReceived, LineItemRemoved, LineItemUpdated, PurchaseOrder,
    PurchaseOrderCancelled, PurchaseOrderClosed, PurchaseOrderCommand, PurchaseOrderConfirmed,
    PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderSent,
    PurchaseOrderStatus, ReceiveLineItem, RejectPurchaseOrder, RemoveLineItem, SendPurchaseOrder,
    SetCharges, SubmitForApproval, SubmittedForApproval, UpdateLineItem,
};
pub use receipt::{OrderTotals, PurchaseOrderLineItem};
pub use supplier::{
    PerformanceGrade, RecordOrderPerformance, RegisterSupplier, Supplier, SupplierCommand,
    SupplierContact, SupplierEvent, SupplierId, SupplierPerformance, SupplierPerformanceRecorded,
    SupplierRegistered,
};
