use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fieldstock_core::money::{MAX_QUANTITY, check_cost_bound, check_quantity_bound, extend};
use fieldstock_core::{
    Aggregate, AggregateRoot, BusinessId, DomainError, UserId, aggregate_id_newtype,
};
use fieldstock_events::Event;

use crate::costing::{
    CostBasis, CostEffect, CostLot, CostLots, CostingMethod, CostingRequest, opening_lots, recost,
};
use crate::movement::{MovementId, MovementReference, MovementType, StockMovement};

aggregate_id_newtype!(
    /// Product identifier (business-scoped via `business_id` fields in events/commands).
    ProductId
);

/// What the product remembers about each of its ledger rows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MovementState {
    movement_type: MovementType,
    quantity: i64,
    unit_cost: Decimal,
    cost_lot: Option<MovementId>,
    requires_approval: bool,
    is_approved: bool,
    is_reversed: bool,
    is_reversal: bool,
}

impl MovementState {
    fn is_effective(&self) -> bool {
        !self.requires_approval || self.is_approved
    }
}

/// Aggregate root: Product.
///
/// Holds the catalog entry and the denormalized stock and cost fields. Stock
/// only changes through ledger events (`MovementPosted`, `MovementApproved`,
/// `MovementReversed`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    business_id: Option<BusinessId>,
    sku: String,
    name: String,
    active: bool,
    costing_method: CostingMethod,
    current_stock: i64,
    reserved_stock: i64,
    weighted_average_cost: Decimal,
    last_cost: Decimal,
    standard_cost: Option<Decimal>,
    reorder_point: i64,
    reorder_quantity: i64,
    lots: CostLots,
    movements: HashMap<MovementId, MovementState>,
    version: u64,
    created: bool,
}

impl Product {
    /// Stream type recorded on every stored event of this aggregate.
    pub const AGGREGATE_TYPE: &'static str = "inventory.product";

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            business_id: None,
            sku: String::new(),
            name: String::new(),
            active: false,
            costing_method: CostingMethod::default(),
            current_stock: 0,
            reserved_stock: 0,
            weighted_average_cost: Decimal::ZERO,
            last_cost: Decimal::ZERO,
            standard_cost: None,
            reorder_point: 0,
            reorder_quantity: 0,
            lots: CostLots::new(),
            movements: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn business_id(&self) -> Option<BusinessId> {
        self.business_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn costing_method(&self) -> CostingMethod {
        self.costing_method
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    pub fn reserved_stock(&self) -> i64 {
        self.reserved_stock
    }

    /// Always derived: `current_stock - reserved_stock`.
    pub fn available_stock(&self) -> i64 {
        self.current_stock - self.reserved_stock
    }

    pub fn weighted_average_cost(&self) -> Decimal {
        self.weighted_average_cost
    }

    pub fn last_cost(&self) -> Decimal {
        self.last_cost
    }

    pub fn standard_cost(&self) -> Option<Decimal> {
        self.standard_cost
    }

    /// Unit cost the product is currently carried at.
    pub fn current_cost(&self) -> Decimal {
        match (self.costing_method, self.standard_cost) {
            (CostingMethod::StandardCost, Some(standard)) => standard,
            _ => self.weighted_average_cost,
        }
    }

    pub fn reorder_point(&self) -> i64 {
        self.reorder_point
    }

    pub fn reorder_quantity(&self) -> i64 {
        self.reorder_quantity
    }

    pub fn is_below_reorder_point(&self) -> bool {
        self.current_stock <= self.reorder_point
    }

    pub fn cost_lots(&self) -> &CostLots {
        &self.lots
    }

    pub fn has_movement(&self, movement_id: MovementId) -> bool {
        self.movements.contains_key(&movement_id)
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub costing_method: CostingMethod,
    pub standard_cost: Option<Decimal>,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMovement {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    /// Lot an outbound movement draws from first (required for specific identification).
    pub cost_lot: Option<MovementId>,
    pub reference: Option<MovementReference>,
    pub requires_approval: bool,
    pub posted_by: Option<UserId>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveMovement {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub approver_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseMovement {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub reversal_id: MovementId,
    pub reason: String,
    pub posted_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecountStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecountStock {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub counted_quantity: i64,
    pub requires_approval: bool,
    pub posted_by: Option<UserId>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseReservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateReorderSettings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReorderSettings {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeCostingMethod.
///
/// Rebuilds the cost basis: stock on hand becomes one opening lot (identified
/// by `opening_lot_id`) at the current weighted-average cost. Keeping the
/// current method requires `recost`; the existing lots are replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCostingMethod {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub costing_method: CostingMethod,
    pub standard_cost: Option<Decimal>,
    pub opening_lot_id: MovementId,
    #[serde(default)]
    pub recost: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateProduct {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    PostMovement(PostMovement),
    ApproveMovement(ApproveMovement),
    ReverseMovement(ReverseMovement),
    RecountStock(RecountStock),
    ReserveStock(ReserveStock),
    ReleaseReservation(ReleaseReservation),
    UpdateReorderSettings(UpdateReorderSettings),
    ChangeCostingMethod(ChangeCostingMethod),
    DeactivateProduct(DeactivateProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub costing_method: CostingMethod,
    pub standard_cost: Option<Decimal>,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementPosted.
///
/// `effect` is `None` for a movement written pending approval; such a row
/// leaves stock and cost untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPosted {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement: StockMovement,
    pub effect: Option<CostEffect>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementApproved (the pending movement is now applied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementApproved {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub approved_by: UserId,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub cost_before: Decimal,
    pub cost_after: Decimal,
    pub effect: CostEffect,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReversed {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub original_movement_id: MovementId,
    pub reason: String,
    pub reversal: StockMovement,
    pub effect: CostEffect,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReorderSettingsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderSettingsUpdated {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CostingMethodChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostingMethodChanged {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub costing_method: CostingMethod,
    pub standard_cost: Option<Decimal>,
    pub weighted_average_cost: Decimal,
    pub lots: Vec<CostLot>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeactivated {
    pub business_id: BusinessId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    MovementPosted(MovementPosted),
    MovementApproved(MovementApproved),
    MovementReversed(MovementReversed),
    StockReserved(StockReserved),
    ReservationReleased(ReservationReleased),
    ReorderSettingsUpdated(ReorderSettingsUpdated),
    CostingMethodChanged(CostingMethodChanged),
    ProductDeactivated(ProductDeactivated),
}

impl ProductEvent {
    /// Ledger movement and quantity delta applied to stock, if this event changed stock.
    pub fn stock_change(&self) -> Option<(MovementId, i64)> {
        match self {
            ProductEvent::MovementPosted(e) if e.effect.is_some() => {
                Some((e.movement.movement_id, e.movement.quantity))
            }
            ProductEvent::MovementApproved(e) => Some((e.movement_id, e.quantity)),
            ProductEvent::MovementReversed(e) => {
                Some((e.reversal.movement_id, e.reversal.quantity))
            }
            _ => None,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "inventory.product.created",
            ProductEvent::MovementPosted(_) => "inventory.movement.posted",
            ProductEvent::MovementApproved(_) => "inventory.movement.approved",
            ProductEvent::MovementReversed(_) => "inventory.movement.reversed",
            ProductEvent::StockReserved(_) => "inventory.product.stock_reserved",
            ProductEvent::ReservationReleased(_) => "inventory.product.reservation_released",
            ProductEvent::ReorderSettingsUpdated(_) => "inventory.product.reorder_settings_updated",
            ProductEvent::CostingMethodChanged(_) => "inventory.product.costing_method_changed",
            ProductEvent::ProductDeactivated(_) => "inventory.product.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::MovementPosted(e) => e.occurred_at,
            ProductEvent::MovementApproved(e) => e.occurred_at,
            ProductEvent::MovementReversed(e) => e.occurred_at,
            ProductEvent::StockReserved(e) => e.occurred_at,
            ProductEvent::ReservationReleased(e) => e.occurred_at,
            ProductEvent::ReorderSettingsUpdated(e) => e.occurred_at,
            ProductEvent::CostingMethodChanged(e) => e.occurred_at,
            ProductEvent::ProductDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.business_id = Some(e.business_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.active = true;
                self.costing_method = e.costing_method;
                self.standard_cost = e.standard_cost;
                if let Some(standard) = e.standard_cost {
                    self.weighted_average_cost = standard;
                    self.last_cost = standard;
                }
                self.reorder_point = e.reorder_point;
                self.reorder_quantity = e.reorder_quantity;
                self.created = true;
            }
            ProductEvent::MovementPosted(e) => {
                let m = &e.movement;
                self.movements.insert(
                    m.movement_id,
                    MovementState {
                        movement_type: m.movement_type,
                        quantity: m.quantity,
                        unit_cost: m.unit_cost,
                        cost_lot: m.cost_lot,
                        requires_approval: m.requires_approval,
                        is_approved: m.is_approved,
                        is_reversed: false,
                        is_reversal: m.is_reversal(),
                    },
                );
                if let Some(effect) = &e.effect {
                    self.apply_effect(m.quantity_after, effect);
                }
            }
            ProductEvent::MovementApproved(e) => {
                if let Some(state) = self.movements.get_mut(&e.movement_id) {
                    state.is_approved = true;
                    state.unit_cost = e.unit_cost;
                }
                self.apply_effect(e.quantity_after, &e.effect);
            }
            ProductEvent::MovementReversed(e) => {
                if let Some(state) = self.movements.get_mut(&e.original_movement_id) {
                    state.is_reversed = true;
                }
                let r = &e.reversal;
                self.movements.insert(
                    r.movement_id,
                    MovementState {
                        movement_type: r.movement_type,
                        quantity: r.quantity,
                        unit_cost: r.unit_cost,
                        cost_lot: None,
                        requires_approval: false,
                        is_approved: false,
                        is_reversed: false,
                        is_reversal: true,
                    },
                );
                self.apply_effect(r.quantity_after, &e.effect);
            }
            ProductEvent::StockReserved(e) => {
                self.reserved_stock += e.quantity;
            }
            ProductEvent::ReservationReleased(e) => {
                self.reserved_stock -= e.quantity;
            }
            ProductEvent::ReorderSettingsUpdated(e) => {
                self.reorder_point = e.reorder_point;
                self.reorder_quantity = e.reorder_quantity;
            }
            ProductEvent::CostingMethodChanged(e) => {
                self.costing_method = e.costing_method;
                self.standard_cost = e.standard_cost;
                self.weighted_average_cost = e.weighted_average_cost;
                self.lots = CostLots::from_lots(e.lots.iter().cloned());
            }
            ProductEvent::ProductDeactivated(_) => {
                self.active = false;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::PostMovement(cmd) => self.handle_post(cmd),
            ProductCommand::ApproveMovement(cmd) => self.handle_approve(cmd),
            ProductCommand::ReverseMovement(cmd) => self.handle_reverse(cmd),
            ProductCommand::RecountStock(cmd) => self.handle_recount(cmd),
            ProductCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            ProductCommand::ReleaseReservation(cmd) => self.handle_release(cmd),
            ProductCommand::UpdateReorderSettings(cmd) => self.handle_reorder_settings(cmd),
            ProductCommand::ChangeCostingMethod(cmd) => self.handle_change_costing(cmd),
            ProductCommand::DeactivateProduct(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Product {
    /// Stock levels are stamped on the event by `handle`, which already checked them.
    fn apply_effect(&mut self, quantity_after: i64, effect: &CostEffect) {
        self.current_stock = quantity_after;
        self.lots.apply_draws(&effect.draws);
        if let Some(lot) = &effect.new_lot {
            self.lots.push(lot.clone());
        }
        self.weighted_average_cost = effect.weighted_average_cost;
        self.last_cost = effect.last_cost;
    }

    fn basis(&self) -> CostBasis {
        CostBasis {
            method: self.costing_method,
            on_hand: self.current_stock,
            weighted_average_cost: self.weighted_average_cost,
            last_cost: self.last_cost,
            standard_cost: self.standard_cost,
        }
    }

    fn ensure_business(&self, business_id: BusinessId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.business_id != Some(business_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    /// Created, same business, same product.
    fn ensure_target(&self, business_id: BusinessId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_business(business_id)?;
        self.ensure_product_id(product_id)
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.active {
            return Err(DomainError::invalid_movement(format!(
                "product {} is deactivated",
                self.sku
            )));
        }
        Ok(())
    }

    /// Stock after `quantity`: never negative, never past `MAX_QUANTITY`.
    fn stock_after(&self, quantity: i64) -> Result<i64, DomainError> {
        let after = self
            .current_stock
            .checked_add(quantity)
            .filter(|after| *after <= MAX_QUANTITY)
            .ok_or_else(|| {
                DomainError::invalid_movement(format!(
                    "movement of {quantity} would take stock of {} past the limit of {MAX_QUANTITY}",
                    self.sku
                ))
            })?;
        if after < 0 {
            return Err(DomainError::invalid_movement(format!(
                "movement of {quantity} would drive stock of {} to {after}",
                self.sku
            )));
        }
        Ok(after)
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.reorder_point < 0 || cmd.reorder_quantity < 0 {
            return Err(DomainError::validation("reorder settings cannot be negative"));
        }
        validate_standard_cost(cmd.costing_method, cmd.standard_cost)?;

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            costing_method: cmd.costing_method,
            standard_cost: cmd.standard_cost,
            reorder_point: cmd.reorder_point,
            reorder_quantity: cmd.reorder_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostMovement) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        self.ensure_active()?;
        if self.movements.contains_key(&cmd.movement_id) {
            return Err(DomainError::conflict(format!(
                "movement {} already posted",
                cmd.movement_id
            )));
        }
        cmd.movement_type.check_quantity(cmd.quantity)?;
        check_quantity_bound(cmd.quantity, "movement quantity")?;
        if let Some(cost) = cmd.unit_cost {
            if cost.is_sign_negative() {
                return Err(DomainError::invalid_movement("unit cost cannot be negative"));
            }
            check_cost_bound(cost, "unit cost")?;
        }
        if cmd.quantity < 0
            && self.costing_method == CostingMethod::SpecificIdentification
            && cmd.cost_lot.is_none()
        {
            return Err(DomainError::validation(
                "specific identification requires the cost lot to draw from",
            ));
        }

        let request = CostingRequest {
            movement_id: cmd.movement_id,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            lot: cmd.cost_lot,
            reverses_inbound: false,
        };

        let (movement, effect) = if cmd.requires_approval {
            let unit_cost = cmd.unit_cost.unwrap_or_else(|| self.current_cost());
            let movement = self.movement_row(
                cmd.movement_id,
                cmd.movement_type,
                cmd.quantity,
                unit_cost,
                self.current_cost(),
                cmd.occurred_at,
            )?;
            (movement, None)
        } else {
            self.stock_after(cmd.quantity)?;
            let effect = recost(&self.basis(), &self.lots, &request)?;
            let movement = self.movement_row(
                cmd.movement_id,
                cmd.movement_type,
                cmd.quantity,
                effect.unit_cost,
                effect.weighted_average_cost,
                cmd.occurred_at,
            )?;
            (movement, Some(effect))
        };

        Ok(vec![ProductEvent::MovementPosted(MovementPosted {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            movement: StockMovement {
                cost_lot: cmd.cost_lot,
                reference: cmd.reference.clone(),
                requires_approval: cmd.requires_approval,
                posted_by: cmd.posted_by,
                notes: cmd.notes.clone(),
                ..movement
            },
            effect,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveMovement) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        self.ensure_active()?;
        let state = self.movements.get(&cmd.movement_id).ok_or(DomainError::NotFound)?;
        if !state.requires_approval {
            return Err(DomainError::conflict(format!(
                "movement {} does not require approval",
                cmd.movement_id
            )));
        }
        if state.is_approved {
            return Err(DomainError::conflict(format!(
                "movement {} is already approved",
                cmd.movement_id
            )));
        }
        let quantity_after = self.stock_after(state.quantity)?;

        let effect = recost(
            &self.basis(),
            &self.lots,
            &CostingRequest {
                movement_id: cmd.movement_id,
                quantity: state.quantity,
                unit_cost: Some(state.unit_cost),
                lot: state.cost_lot,
                reverses_inbound: false,
            },
        )?;
        let total_cost = extend(state.quantity, effect.unit_cost)
            .ok_or_else(|| DomainError::invalid_movement("movement total is out of range"))?;

        Ok(vec![ProductEvent::MovementApproved(MovementApproved {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            movement_id: cmd.movement_id,
            approved_by: cmd.approver_id,
            quantity: state.quantity,
            unit_cost: effect.unit_cost,
            total_cost,
            quantity_before: self.current_stock,
            quantity_after,
            cost_before: self.current_cost(),
            cost_after: effect.weighted_average_cost,
            effect,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseMovement) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        let original = self.movements.get(&cmd.movement_id).ok_or(DomainError::NotFound)?;
        if original.is_reversal {
            return Err(DomainError::invalid_movement("a reversal cannot itself be reversed"));
        }
        if !original.is_effective() {
            return Err(DomainError::invalid_movement(
                "a movement awaiting approval cannot be reversed",
            ));
        }
        if original.is_reversed {
            return Err(DomainError::already_reversed(cmd.movement_id));
        }
        if self.movements.contains_key(&cmd.reversal_id) {
            return Err(DomainError::conflict(format!(
                "movement {} already posted",
                cmd.reversal_id
            )));
        }

        let quantity = -original.quantity;
        self.stock_after(quantity)?;

        let mut basis = self.basis();
        let original_lot_on_hand = self.lots.iter().any(|l| l.lot_id == cmd.movement_id);
        if basis.method == CostingMethod::SpecificIdentification && !original_lot_on_hand {
            basis.method = CostingMethod::Fifo;
        }
        let effect = recost(
            &basis,
            &self.lots,
            &CostingRequest {
                movement_id: cmd.reversal_id,
                quantity,
                unit_cost: Some(original.unit_cost),
                lot: original_lot_on_hand.then_some(cmd.movement_id),
                reverses_inbound: original.quantity > 0,
            },
        )?;

        let reversal = StockMovement {
            reference: Some(MovementReference::reversal(cmd.movement_id)),
            original_movement_id: Some(cmd.movement_id),
            posted_by: cmd.posted_by,
            notes: Some(cmd.reason.clone()),
            ..self.movement_row(
                cmd.reversal_id,
                original.movement_type,
                quantity,
                effect.unit_cost,
                effect.weighted_average_cost,
                cmd.occurred_at,
            )?
        };

        Ok(vec![ProductEvent::MovementReversed(MovementReversed {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            original_movement_id: cmd.movement_id,
            reason: cmd.reason.clone(),
            reversal,
            effect,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_recount(&self, cmd: &RecountStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        if cmd.counted_quantity < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        check_quantity_bound(cmd.counted_quantity, "counted quantity")?;
        let difference = cmd.counted_quantity - self.current_stock;
        if difference == 0 {
            return Err(DomainError::invalid_movement(
                "recount matches current stock; nothing to post",
            ));
        }
        self.handle_post(&PostMovement {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            movement_id: cmd.movement_id,
            movement_type: MovementType::Recount,
            quantity: difference,
            unit_cost: None,
            cost_lot: None,
            reference: None,
            requires_approval: cmd.requires_approval,
            posted_by: cmd.posted_by,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("reservation quantity must be positive"));
        }
        if cmd.quantity > self.available_stock() {
            return Err(DomainError::invariant(format!(
                "cannot reserve {} of {}: only {} available",
                cmd.quantity,
                self.sku,
                self.available_stock()
            )));
        }
        Ok(vec![ProductEvent::StockReserved(StockReserved {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseReservation) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("release quantity must be positive"));
        }
        if cmd.quantity > self.reserved_stock {
            return Err(DomainError::invariant(format!(
                "cannot release {} of {}: only {} reserved",
                cmd.quantity, self.sku, self.reserved_stock
            )));
        }
        Ok(vec![ProductEvent::ReservationReleased(ReservationReleased {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reorder_settings(
        &self,
        cmd: &UpdateReorderSettings,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        if cmd.reorder_point < 0 || cmd.reorder_quantity < 0 {
            return Err(DomainError::validation("reorder settings cannot be negative"));
        }
        Ok(vec![ProductEvent::ReorderSettingsUpdated(ReorderSettingsUpdated {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            reorder_point: cmd.reorder_point,
            reorder_quantity: cmd.reorder_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_costing(
        &self,
        cmd: &ChangeCostingMethod,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        self.ensure_active()?;
        validate_standard_cost(cmd.costing_method, cmd.standard_cost)?;
        if cmd.costing_method == self.costing_method && !cmd.recost {
            return Err(DomainError::conflict(format!(
                "product {} already uses {}; request a re-cost to rebuild its cost basis",
                self.sku, cmd.costing_method
            )));
        }

        let carried = self.current_cost();
        let weighted_average_cost = match cmd.costing_method {
            CostingMethod::StandardCost => cmd.standard_cost.unwrap_or(carried),
            _ => carried,
        };
        let lots = if cmd.costing_method.uses_cost_lots() {
            opening_lots(cmd.opening_lot_id, self.current_stock, carried)
                .iter()
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        Ok(vec![ProductEvent::CostingMethodChanged(CostingMethodChanged {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            costing_method: cmd.costing_method,
            standard_cost: cmd.standard_cost,
            weighted_average_cost,
            lots,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.product_id)?;
        if !self.active {
            return Err(DomainError::conflict("product is already deactivated"));
        }
        Ok(vec![ProductEvent::ProductDeactivated(ProductDeactivated {
            business_id: cmd.business_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Ledger row stamped against current stock and cost.
    fn movement_row(
        &self,
        movement_id: MovementId,
        movement_type: MovementType,
        quantity: i64,
        unit_cost: Decimal,
        cost_after: Decimal,
        posted_at: DateTime<Utc>,
    ) -> Result<StockMovement, DomainError> {
        let out_of_range = || DomainError::invalid_movement(format!("movement of {quantity} is out of range"));
        Ok(StockMovement {
            movement_id,
            product_id: self.id,
            movement_type,
            quantity,
            unit_cost,
            total_cost: extend(quantity, unit_cost).ok_or_else(out_of_range)?,
            quantity_before: self.current_stock,
            quantity_after: self.current_stock.checked_add(quantity).ok_or_else(out_of_range)?,
            cost_before: self.current_cost(),
            cost_after,
            cost_lot: None,
            reference: None,
            requires_approval: false,
            is_approved: false,
            approved_by: None,
            is_reversed: false,
            reversal_movement_id: None,
            original_movement_id: None,
            posted_by: None,
            notes: None,
            posted_at,
        })
    }
}

fn validate_standard_cost(method: CostingMethod, standard_cost: Option<Decimal>) -> Result<(), DomainError> {
    match standard_cost {
        Some(cost) if cost.is_sign_negative() => {
            Err(DomainError::validation("standard cost cannot be negative"))
        }
        Some(cost) => check_cost_bound(cost, "standard cost"),
        None if method == CostingMethod::StandardCost => Err(DomainError::validation(
            "standard-cost products require a standard cost",
        )),
        _ => Ok(()),
    }
}
