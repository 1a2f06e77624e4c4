//! Inventory domain module (event-sourced).
//!
//! Product catalog, stock ledger rows and the costing engine, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod costing;
pub mod integration;
pub mod movement;
pub mod product;

pub use costing::{CostEffect, CostLot, CostLots, CostingMethod, LotDraw, weighted_average};
pub use integration::StockMovementPosted;
pub use movement::{
    MovementDirection, MovementId, MovementReference, MovementType, REFERENCE_PURCHASE_ORDER,
    REFERENCE_REVERSAL, StockMovement,
};
pub use product::{
    ApproveMovement, ChangeCostingMethod, CostingMethodChanged, CreateProduct, DeactivateProduct,
    MovementApproved, MovementPosted, MovementReversed, PostMovement, Product, ProductCommand,
    ProductCreated, ProductDeactivated, ProductEvent, ProductId, RecountStock, ReleaseReservation,
    ReorderSettingsUpdated, ReservationReleased, ReserveStock, ReverseMovement, StockReserved,
    UpdateReorderSettings,
};
