use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fieldstock_core::money::round_money;
use fieldstock_core::{Aggregate, AggregateRoot, BusinessId, DomainError, aggregate_id_newtype};
use fieldstock_events::Event;

use crate::order::PurchaseOrderId;

aggregate_id_newtype!(
    /// Supplier identifier (business-scoped).
    SupplierId
);

/// Letter grade derived from on-time rate and quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PerformanceGrade {
    A,
    B,
    C,
    D,
    F,
}

impl PerformanceGrade {
    /// Grade for a 0-100 score.
    pub fn from_score(score: Decimal) -> Self {
        if score >= Decimal::from(90) {
            PerformanceGrade::A
        } else if score >= Decimal::from(80) {
            PerformanceGrade::B
        } else if score >= Decimal::from(70) {
            PerformanceGrade::C
        } else if score >= Decimal::from(60) {
            PerformanceGrade::D
        } else {
            PerformanceGrade::F
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierContact {
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Rolling metrics over closed purchase orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPerformance {
    pub orders_closed: u32,
    pub on_time_orders: u32,
    /// Percentage of closed orders delivered by the expected date.
    pub on_time_delivery_rate: Decimal,
    /// Rolling mean of received/ordered fill rate, as a percentage.
    pub quality_score: Decimal,
    pub performance_grade: Option<PerformanceGrade>,
}

impl SupplierPerformance {
    /// Metrics after one more closed order.
    pub fn record(&self, delivered_on_time: bool, fill_rate: Decimal) -> Self {
        let orders_closed = self.orders_closed.saturating_add(1);
        let on_time_orders = self.on_time_orders.saturating_add(u32::from(delivered_on_time));
        let on_time_delivery_rate = round_money(
            Decimal::from(on_time_orders) * Decimal::ONE_HUNDRED / Decimal::from(orders_closed),
        );
        let quality_score = round_money(
            (self.quality_score * Decimal::from(self.orders_closed) + fill_rate)
                / Decimal::from(orders_closed),
        );
        let grade = PerformanceGrade::from_score((on_time_delivery_rate + quality_score) / Decimal::TWO);
        Self {
            orders_closed,
            on_time_orders,
            on_time_delivery_rate,
            quality_score,
            performance_grade: Some(grade),
        }
    }
}

/// Aggregate root: Supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supplier {
    id: SupplierId,
    business_id: Option<BusinessId>,
    name: String,
    contact: SupplierContact,
    payment_terms: Option<String>,
    performance: SupplierPerformance,
    recorded_orders: HashSet<PurchaseOrderId>,
    version: u64,
    created: bool,
}

impl Supplier {
    /// Stream type recorded on every stored event of this aggregate.
    pub const AGGREGATE_TYPE: &'static str = "purchasing.supplier";

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SupplierId) -> Self {
        Self {
            id,
            business_id: None,
            name: String::new(),
            contact: SupplierContact::default(),
            payment_terms: None,
            performance: SupplierPerformance::default(),
            recorded_orders: HashSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SupplierId {
        self.id
    }

    pub fn business_id(&self) -> Option<BusinessId> {
        self.business_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &SupplierContact {
        &self.contact
    }

    pub fn payment_terms(&self) -> Option<&str> {
        self.payment_terms.as_deref()
    }

    pub fn performance(&self) -> &SupplierPerformance {
        &self.performance
    }
}

impl AggregateRoot for Supplier {
    type Id = SupplierId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterSupplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSupplier {
    pub business_id: BusinessId,
    pub supplier_id: SupplierId,
    pub name: String,
    pub contact: SupplierContact,
    pub payment_terms: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordOrderPerformance (issued when a purchase order closes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOrderPerformance {
    pub business_id: BusinessId,
    pub supplier_id: SupplierId,
    pub order_id: PurchaseOrderId,
    pub delivered_on_time: bool,
    pub fill_rate: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupplierCommand {
    RegisterSupplier(RegisterSupplier),
    RecordOrderPerformance(RecordOrderPerformance),
}

/// Event: SupplierRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierRegistered {
    pub business_id: BusinessId,
    pub supplier_id: SupplierId,
    pub name: String,
    pub contact: SupplierContact,
    pub payment_terms: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SupplierPerformanceRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPerformanceRecorded {
    pub business_id: BusinessId,
    pub supplier_id: SupplierId,
    pub order_id: PurchaseOrderId,
    pub performance: SupplierPerformance,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupplierEvent {
    SupplierRegistered(SupplierRegistered),
    SupplierPerformanceRecorded(SupplierPerformanceRecorded),
}

impl Event for SupplierEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SupplierEvent::SupplierRegistered(_) => "purchasing.supplier.registered",
            SupplierEvent::SupplierPerformanceRecorded(_) => "purchasing.supplier.performance_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SupplierEvent::SupplierRegistered(e) => e.occurred_at,
            SupplierEvent::SupplierPerformanceRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Supplier {
    type Command = SupplierCommand;
    type Event = SupplierEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SupplierEvent::SupplierRegistered(e) => {
                self.id = e.supplier_id;
                self.business_id = Some(e.business_id);
                self.name = e.name.clone();
                self.contact = e.contact.clone();
                self.payment_terms = e.payment_terms.clone();
                self.created = true;
            }
            SupplierEvent::SupplierPerformanceRecorded(e) => {
                self.performance = e.performance.clone();
                self.recorded_orders.insert(e.order_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SupplierCommand::RegisterSupplier(cmd) => self.handle_register(cmd),
            SupplierCommand::RecordOrderPerformance(cmd) => self.handle_record(cmd),
        }
    }
}

impl Supplier {
    fn handle_register(&self, cmd: &RegisterSupplier) -> Result<Vec<SupplierEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("supplier already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(vec![SupplierEvent::SupplierRegistered(SupplierRegistered {
            business_id: cmd.business_id,
            supplier_id: cmd.supplier_id,
            name: cmd.name.trim().to_string(),
            contact: cmd.contact.clone(),
            payment_terms: cmd.payment_terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordOrderPerformance) -> Result<Vec<SupplierEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.business_id != Some(cmd.business_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.recorded_orders.contains(&cmd.order_id) {
            return Err(DomainError::conflict(format!(
                "performance for order {} already recorded",
                cmd.order_id
            )));
        }
        if cmd.fill_rate.is_sign_negative() || cmd.fill_rate > Decimal::ONE_HUNDRED {
            return Err(DomainError::validation("fill rate must be within 0..=100"));
        }
        Ok(vec![SupplierEvent::SupplierPerformanceRecorded(SupplierPerformanceRecorded {
            business_id: cmd.business_id,
            supplier_id: cmd.supplier_id,
            order_id: cmd.order_id,
            performance: self.performance.record(cmd.delivered_on_time, cmd.fill_rate),
            occurred_at: cmd.occurred_at,
        })])
    }
}
