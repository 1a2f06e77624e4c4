//! Costing engine: unit cost of each movement and the resulting cost basis.
//!
//! Weighted-average products carry a single blended cost. FIFO, LIFO and
//! specific-identification products also carry an ordered list of cost lots,
//! appended on inbound movements and consumed on outbound ones. Standard-cost
//! products ignore movement cost and always report the configured standard.

use core::str::FromStr;
use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fieldstock_core::money::{COST_SCALE, checked_sum, extend, round_cost};
use fieldstock_core::{DomainError, DomainResult};

use crate::movement::MovementId;

/// Costing method, fixed per product at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostingMethod {
    Fifo,
    Lifo,
    #[default]
    WeightedAverage,
    SpecificIdentification,
    StandardCost,
}

impl CostingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostingMethod::Fifo => "fifo",
            CostingMethod::Lifo => "lifo",
            CostingMethod::WeightedAverage => "weighted_average",
            CostingMethod::SpecificIdentification => "specific_identification",
            CostingMethod::StandardCost => "standard_cost",
        }
    }

    /// Whether the method needs per-lot tracking.
    pub fn uses_cost_lots(&self) -> bool {
        matches!(
            self,
            CostingMethod::Fifo | CostingMethod::Lifo | CostingMethod::SpecificIdentification
        )
    }
}

impl core::fmt::Display for CostingMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostingMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fifo" => Ok(CostingMethod::Fifo),
            "lifo" => Ok(CostingMethod::Lifo),
            "weighted_average" | "average" => Ok(CostingMethod::WeightedAverage),
            "specific_identification" | "specific" => Ok(CostingMethod::SpecificIdentification),
            "standard_cost" | "standard" => Ok(CostingMethod::StandardCost),
            _ => Err(DomainError::validation(format!("unknown costing method '{s}'"))),
        }
    }
}

/// A quantity of stock acquired at one unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLot {
    /// The inbound movement that created the lot (or the opening lot of a re-costing pass).
    pub lot_id: MovementId,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

/// Quantity taken out of one lot by an outbound movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: MovementId,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

/// Ordered cost lots for one product, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLots {
    lots: VecDeque<CostLot>,
}

impl CostLots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lots(lots: impl IntoIterator<Item = CostLot>) -> Self {
        Self {
            lots: lots.into_iter().filter(|l| l.quantity > 0).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CostLot> {
        self.lots.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn total_quantity(&self) -> i64 {
        self.lots.iter().map(|l| l.quantity).sum()
    }

    /// Sum of `quantity * unit_cost` over all lots; `None` on overflow.
    pub fn total_value(&self) -> Option<Decimal> {
        self.lots
            .iter()
            .map(|l| extend(l.quantity, l.unit_cost))
            .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v?))
    }

    pub fn push(&mut self, lot: CostLot) {
        if lot.quantity > 0 {
            self.lots.push_back(lot);
        }
    }

    /// Plan which lots an outbound `quantity` (positive) consumes.
    ///
    /// The `preferred` lot is drained first; the rest follows the method's
    /// order (front-to-back for FIFO, back-to-front for LIFO). Specific
    /// identification never falls through to other lots.
    pub fn plan_draw(
        &self,
        method: CostingMethod,
        quantity: i64,
        preferred: Option<MovementId>,
    ) -> DomainResult<Vec<LotDraw>> {
        let mut remaining = quantity;
        let mut draws: Vec<LotDraw> = Vec::new();

        if let Some(lot_id) = preferred {
            let lot = self
                .lots
                .iter()
                .find(|l| l.lot_id == lot_id)
                .ok_or_else(|| DomainError::invalid_movement(format!("cost lot {lot_id} is not on hand")))?;
            let take = remaining.min(lot.quantity);
            draws.push(LotDraw {
                lot_id,
                quantity: take,
                unit_cost: lot.unit_cost,
            });
            remaining -= take;
        } else if method == CostingMethod::SpecificIdentification {
            return Err(DomainError::validation(
                "specific identification requires the cost lot to draw from",
            ));
        }

        if remaining > 0 && method == CostingMethod::SpecificIdentification {
            return Err(DomainError::invalid_movement(format!(
                "cost lot holds {} fewer units than requested",
                remaining
            )));
        }

        let ordered: Box<dyn Iterator<Item = &CostLot>> = match method {
            CostingMethod::Lifo => Box::new(self.lots.iter().rev()),
            _ => Box::new(self.lots.iter()),
        };

        for lot in ordered {
            if remaining == 0 {
                break;
            }
            if Some(lot.lot_id) == preferred {
                continue;
            }
            let take = remaining.min(lot.quantity);
            draws.push(LotDraw {
                lot_id: lot.lot_id,
                quantity: take,
                unit_cost: lot.unit_cost,
            });
            remaining -= take;
        }

        if remaining > 0 {
            return Err(DomainError::invalid_movement(format!(
                "cost lots are short by {remaining} units"
            )));
        }

        Ok(draws)
    }

    /// Consume planned draws. Emptied lots are dropped.
    pub fn apply_draws(&mut self, draws: &[LotDraw]) {
        for draw in draws {
            if let Some(lot) = self.lots.iter_mut().find(|l| l.lot_id == draw.lot_id) {
                lot.quantity -= draw.quantity;
            }
        }
        self.lots.retain(|l| l.quantity > 0);
    }
}

/// Cost basis of a product at the moment a movement is costed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBasis {
    pub method: CostingMethod,
    pub on_hand: i64,
    pub weighted_average_cost: Decimal,
    pub last_cost: Decimal,
    pub standard_cost: Option<Decimal>,
}

/// What the engine is asked to cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostingRequest {
    pub movement_id: MovementId,
    pub quantity: i64,
    /// Caller-supplied cost; only meaningful for inbound movements.
    pub unit_cost: Option<Decimal>,
    /// Lot an outbound movement must draw from first.
    pub lot: Option<MovementId>,
    /// Outbound compensation of an earlier inbound: removes that cost from the average.
    pub reverses_inbound: bool,
}

/// Cost-basis change produced by one movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEffect {
    pub unit_cost: Decimal,
    pub weighted_average_cost: Decimal,
    pub last_cost: Decimal,
    pub draws: Vec<LotDraw>,
    pub new_lot: Option<CostLot>,
}

/// Largest error `round_cost` introduces into one unit cost.
const HALF_COST_STEP: Decimal = Decimal::from_parts(5, 0, 0, false, COST_SCALE + 1);

fn out_of_range() -> DomainError {
    DomainError::invalid_movement("cost arithmetic is out of range")
}

/// Weighted-average recomputation for one movement.
///
/// `(old_avg * old_qty + qty * unit_cost) / (old_qty + qty)`; when the
/// denominator is zero the old average is kept. A movement that would leave
/// the remaining stock with a negative value is rejected; a deficit no larger
/// than the rounding of `old_avg` (half a cost step per unit) counts as zero.
pub fn weighted_average(old_avg: Decimal, old_qty: i64, qty: i64, unit_cost: Decimal) -> DomainResult<Decimal> {
    let new_qty = old_qty.checked_add(qty).ok_or_else(out_of_range)?;
    if new_qty == 0 {
        return Ok(old_avg);
    }
    let value = checked_sum([
        extend(old_qty, old_avg).ok_or_else(out_of_range)?,
        extend(qty, unit_cost).ok_or_else(out_of_range)?,
    ])
    .ok_or_else(out_of_range)?;
    if value.is_sign_negative() {
        let rounding_slack = extend(old_qty.abs(), HALF_COST_STEP).ok_or_else(out_of_range)?;
        if -value > rounding_slack {
            return Err(DomainError::invalid_movement(format!(
                "removing {} at {unit_cost} would leave {new_qty} units with a negative cost basis",
                -qty
            )));
        }
        return Ok(Decimal::ZERO);
    }
    Ok(round_cost(value / Decimal::from(new_qty)))
}

/// Cost one movement against a product's basis and lots.
pub fn recost(basis: &CostBasis, lots: &CostLots, req: &CostingRequest) -> DomainResult<CostEffect> {
    if let Some(cost) = req.unit_cost {
        if cost.is_sign_negative() {
            return Err(DomainError::invalid_movement("unit cost cannot be negative"));
        }
    }

    if basis.method == CostingMethod::StandardCost {
        let standard = basis
            .standard_cost
            .ok_or_else(|| DomainError::validation("standard-cost product has no standard cost"))?;
        let last_cost = if req.quantity > 0 {
            req.unit_cost.unwrap_or(standard)
        } else {
            basis.last_cost
        };
        return Ok(CostEffect {
            unit_cost: standard,
            weighted_average_cost: standard,
            last_cost,
            draws: Vec::new(),
            new_lot: None,
        });
    }

    if req.quantity > 0 {
        return cost_inbound(basis, lots, req);
    }

    cost_outbound(basis, lots, req)
}

fn cost_inbound(basis: &CostBasis, lots: &CostLots, req: &CostingRequest) -> DomainResult<CostEffect> {
    let unit_cost = req.unit_cost.unwrap_or(basis.weighted_average_cost);

    if basis.method.uses_cost_lots() {
        let lot = CostLot {
            lot_id: req.movement_id,
            quantity: req.quantity,
            unit_cost,
        };
        let value = checked_sum([
            lots.total_value().ok_or_else(out_of_range)?,
            extend(lot.quantity, lot.unit_cost).ok_or_else(out_of_range)?,
        ])
        .ok_or_else(out_of_range)?;
        let quantity = lots
            .total_quantity()
            .checked_add(lot.quantity)
            .ok_or_else(out_of_range)?;
        let average = blended(value, quantity, basis.weighted_average_cost);
        return Ok(CostEffect {
            unit_cost,
            weighted_average_cost: average,
            last_cost: unit_cost,
            draws: Vec::new(),
            new_lot: Some(lot),
        });
    }

    Ok(CostEffect {
        unit_cost,
        weighted_average_cost: weighted_average(
            basis.weighted_average_cost,
            basis.on_hand,
            req.quantity,
            unit_cost,
        )?,
        last_cost: unit_cost,
        draws: Vec::new(),
        new_lot: None,
    })
}

fn cost_outbound(basis: &CostBasis, lots: &CostLots, req: &CostingRequest) -> DomainResult<CostEffect> {
    let out = -req.quantity;

    if basis.method.uses_cost_lots() {
        let draws = lots.plan_draw(basis.method, out, req.lot)?;
        let drawn_value = draws
            .iter()
            .map(|d| extend(d.quantity, d.unit_cost))
            .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v?))
            .ok_or_else(out_of_range)?;
        let unit_cost = round_cost(drawn_value / Decimal::from(out));
        let remaining_value = lots
            .total_value()
            .and_then(|total| total.checked_sub(drawn_value))
            .ok_or_else(out_of_range)?;
        let average = blended(
            remaining_value,
            lots.total_quantity() - out,
            basis.weighted_average_cost,
        );
        return Ok(CostEffect {
            unit_cost,
            weighted_average_cost: average,
            last_cost: basis.last_cost,
            draws,
            new_lot: None,
        });
    }

    if req.reverses_inbound {
        let unit_cost = req.unit_cost.unwrap_or(basis.weighted_average_cost);
        let average = weighted_average(basis.weighted_average_cost, basis.on_hand, req.quantity, unit_cost)?;
        return Ok(CostEffect {
            unit_cost,
            weighted_average_cost: average,
            last_cost: basis.last_cost,
            draws: Vec::new(),
            new_lot: None,
        });
    }

    // Issues leave the average untouched and are valued at it.
    Ok(CostEffect {
        unit_cost: basis.weighted_average_cost,
        weighted_average_cost: basis.weighted_average_cost,
        last_cost: basis.last_cost,
        draws: Vec::new(),
        new_lot: None,
    })
}

fn blended(value: Decimal, quantity: i64, fallback: Decimal) -> Decimal {
    if quantity <= 0 {
        return fallback;
    }
    round_cost(value / Decimal::from(quantity))
}

/// Opening lots for a re-costing pass: everything on hand becomes one lot at `unit_cost`.
pub fn opening_lots(lot_id: MovementId, on_hand: i64, unit_cost: Decimal) -> CostLots {
    let mut lots = CostLots::new();
    lots.push(CostLot {
        lot_id,
        quantity: on_hand,
        unit_cost,
    });
    lots
}
