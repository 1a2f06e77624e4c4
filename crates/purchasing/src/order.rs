use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fieldstock_core::money::{check_cost_bound, check_quantity_bound};
use fieldstock_core::{Aggregate, AggregateRoot, BusinessId, DomainError, UserId, aggregate_id_newtype};
use fieldstock_events::Event;
use fieldstock_inventory::{MovementId, ProductId};

use crate::approval::{
    ApprovalAssignment, ApprovalDecision, ApprovalStatus, PurchaseOrderApproval, approve_step,
    rejection_level, validate_assignments,
};
use crate::receipt::{OrderTotals, PurchaseOrderLineItem, derive_status, fill_rate};
use crate::supplier::SupplierId;

aggregate_id_newtype!(
    /// Purchase order identifier (business-scoped via `business_id` fields in events/commands).
    PurchaseOrderId
);

aggregate_id_newtype!(
    /// Line item identifier, unique within its purchase order.
    LineItemId
);

/// Purchase order status lifecycle.
///
/// Approval progress is tracked separately in [`ApprovalStatus`]; an order
/// stays `draft` until it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Sent,
    Confirmed,
    PartiallyReceived,
    Received,
    Cancelled,
    Closed,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Sent => "sent",
            PurchaseOrderStatus::Confirmed => "confirmed",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
            PurchaseOrderStatus::Closed => "closed",
        }
    }

    /// Receipts may be recorded in these states.
    pub fn accepts_receipts(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Sent
                | PurchaseOrderStatus::Confirmed
                | PurchaseOrderStatus::PartiallyReceived
        )
    }
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    business_id: Option<BusinessId>,
    supplier_id: Option<SupplierId>,
    order_number: String,
    status: PurchaseOrderStatus,
    approval_status: ApprovalStatus,
    submitted: bool,
    required_approval_levels: u32,
    current_approval_level: u32,
    approvals: Vec<PurchaseOrderApproval>,
    lines: Vec<PurchaseOrderLineItem>,
    next_line_no: u32,
    tax_rate: Decimal,
    totals: OrderTotals,
    order_date: Option<NaiveDate>,
    expected_delivery_date: Option<NaiveDate>,
    actual_delivery_date: Option<NaiveDate>,
    notes: Option<String>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Stream type recorded on every stored event of this aggregate.
    pub const AGGREGATE_TYPE: &'static str = "purchasing.purchase_order";

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            business_id: None,
            supplier_id: None,
            order_number: String::new(),
            status: PurchaseOrderStatus::Draft,
            approval_status: ApprovalStatus::NotRequired,
            submitted: false,
            required_approval_levels: 0,
            current_approval_level: 0,
            approvals: Vec::new(),
            lines: Vec::new(),
            next_line_no: 1,
            tax_rate: Decimal::ZERO,
            totals: OrderTotals::default(),
            order_date: None,
            expected_delivery_date: None,
            actual_delivery_date: None,
            notes: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn business_id(&self) -> Option<BusinessId> {
        self.business_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn approval_status(&self) -> ApprovalStatus {
        self.approval_status
    }

    pub fn required_approval_levels(&self) -> u32 {
        self.required_approval_levels
    }

    pub fn current_approval_level(&self) -> u32 {
        self.current_approval_level
    }

    pub fn approvals(&self) -> &[PurchaseOrderApproval] {
        &self.approvals
    }

    pub fn lines(&self) -> &[PurchaseOrderLineItem] {
        &self.lines
    }

    pub fn line(&self, line_id: LineItemId) -> Option<&PurchaseOrderLineItem> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
    }

    pub fn order_date(&self) -> Option<NaiveDate> {
        self.order_date
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn actual_delivery_date(&self) -> Option<NaiveDate> {
        self.actual_delivery_date
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Line items and charges may change: a draft that is neither awaiting nor holding approval.
    pub fn is_editable(&self) -> bool {
        self.status == PurchaseOrderStatus::Draft
            && !(self.submitted && self.approval_status == ApprovalStatus::Pending)
            && self.approval_status != ApprovalStatus::Approved
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub order_number: String,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub required_approval_levels: u32,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLineItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLineItem {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub product_id: ProductId,
    pub description: Option<String>,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateLineItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLineItem {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveLineItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLineItem {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetCharges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCharges {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    /// Fraction of the subtotal, e.g. `0.0825`.
    pub tax_rate: Decimal,
    pub shipping_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitForApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitForApproval {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub assignments: Vec<ApprovalAssignment>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApprovePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovePurchaseOrder {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub approver_id: UserId,
    pub comments: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPurchaseOrder {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub approver_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPurchaseOrder {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub sent_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPurchaseOrder (supplier acknowledgement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPurchaseOrder {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub expected_delivery_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveLineItem.
///
/// `movement_id` identifies the purchase movement the receipt posts to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLineItem {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    pub movement_id: MovementId,
    pub received_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPurchaseOrder {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClosePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosePurchaseOrder {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddLineItem(AddLineItem),
    UpdateLineItem(UpdateLineItem),
    RemoveLineItem(RemoveLineItem),
    SetCharges(SetCharges),
    SubmitForApproval(SubmitForApproval),
    ApprovePurchaseOrder(ApprovePurchaseOrder),
    RejectPurchaseOrder(RejectPurchaseOrder),
    SendPurchaseOrder(SendPurchaseOrder),
    ConfirmPurchaseOrder(ConfirmPurchaseOrder),
    ReceiveLineItem(ReceiveLineItem),
    CancelPurchaseOrder(CancelPurchaseOrder),
    ClosePurchaseOrder(ClosePurchaseOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub order_number: String,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub required_approval_levels: u32,
    pub approval_status: ApprovalStatus,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemAdded {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line: PurchaseOrderLineItem,
    pub totals: OrderTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemUpdated {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
    pub totals: OrderTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRemoved {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub totals: OrderTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChargesSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargesSet {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub tax_rate: Decimal,
    pub totals: OrderTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubmittedForApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedForApproval {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub assignments: Vec<ApprovalAssignment>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ApprovalGranted (one approver at one level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGranted {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub approver_id: UserId,
    pub level: u32,
    pub comments: Option<String>,
    pub current_approval_level: u32,
    pub approval_status: ApprovalStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ApprovalDenied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDenied {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub approver_id: UserId,
    pub level: u32,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSent {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub sent_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderConfirmed {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub expected_delivery_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemReceived {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub quantity: i64,
    /// Actual cost if supplied, otherwise the line's unit cost.
    pub unit_cost: Decimal,
    pub quantity_received: i64,
    pub quantity_remaining: i64,
    pub status: PurchaseOrderStatus,
    pub received_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderClosed {
    pub business_id: BusinessId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub delivered_on_time: bool,
    /// Received over ordered, percent.
    pub fill_rate: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    LineItemAdded(LineItemAdded),
    LineItemUpdated(LineItemUpdated),
    LineItemRemoved(LineItemRemoved),
    ChargesSet(ChargesSet),
    SubmittedForApproval(SubmittedForApproval),
    ApprovalGranted(ApprovalGranted),
    ApprovalDenied(ApprovalDenied),
    PurchaseOrderSent(PurchaseOrderSent),
    PurchaseOrderConfirmed(PurchaseOrderConfirmed),
    LineItemReceived(LineItemReceived),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
    PurchaseOrderClosed(PurchaseOrderClosed),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.purchase_order.created",
            PurchaseOrderEvent::LineItemAdded(_) => "purchasing.purchase_order.line_added",
            PurchaseOrderEvent::LineItemUpdated(_) => "purchasing.purchase_order.line_updated",
            PurchaseOrderEvent::LineItemRemoved(_) => "purchasing.purchase_order.line_removed",
            PurchaseOrderEvent::ChargesSet(_) => "purchasing.purchase_order.charges_set",
            PurchaseOrderEvent::SubmittedForApproval(_) => "purchasing.purchase_order.submitted",
            PurchaseOrderEvent::ApprovalGranted(_) => "purchasing.purchase_order.approval_granted",
            PurchaseOrderEvent::ApprovalDenied(_) => "purchasing.purchase_order.approval_denied",
            PurchaseOrderEvent::PurchaseOrderSent(_) => "purchasing.purchase_order.sent",
            PurchaseOrderEvent::PurchaseOrderConfirmed(_) => "purchasing.purchase_order.confirmed",
            PurchaseOrderEvent::LineItemReceived(_) => "purchasing.purchase_order.line_received",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.purchase_order.cancelled",
            PurchaseOrderEvent::PurchaseOrderClosed(_) => "purchasing.purchase_order.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::LineItemAdded(e) => e.occurred_at,
            PurchaseOrderEvent::LineItemUpdated(e) => e.occurred_at,
            PurchaseOrderEvent::LineItemRemoved(e) => e.occurred_at,
            PurchaseOrderEvent::ChargesSet(e) => e.occurred_at,
            PurchaseOrderEvent::SubmittedForApproval(e) => e.occurred_at,
            PurchaseOrderEvent::ApprovalGranted(e) => e.occurred_at,
            PurchaseOrderEvent::ApprovalDenied(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderSent(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderConfirmed(e) => e.occurred_at,
            PurchaseOrderEvent::LineItemReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.business_id = Some(e.business_id);
                self.supplier_id = Some(e.supplier_id);
                self.order_number = e.order_number.clone();
                self.status = PurchaseOrderStatus::Draft;
                self.approval_status = e.approval_status;
                self.required_approval_levels = e.required_approval_levels;
                self.order_date = Some(e.order_date);
                self.expected_delivery_date = e.expected_delivery_date;
                self.notes = e.notes.clone();
                self.lines.clear();
                self.created = true;
            }
            PurchaseOrderEvent::LineItemAdded(e) => {
                self.next_line_no = self.next_line_no.max(e.line.line_no + 1);
                self.lines.push(e.line.clone());
                self.totals = e.totals;
            }
            PurchaseOrderEvent::LineItemUpdated(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == e.line_id) {
                    line.quantity_ordered = e.quantity_ordered;
                    line.unit_cost = e.unit_cost;
                }
                self.totals = e.totals;
            }
            PurchaseOrderEvent::LineItemRemoved(e) => {
                self.lines.retain(|l| l.line_id != e.line_id);
                self.totals = e.totals;
            }
            PurchaseOrderEvent::ChargesSet(e) => {
                self.tax_rate = e.tax_rate;
                self.totals = e.totals;
            }
            PurchaseOrderEvent::SubmittedForApproval(e) => {
                self.submitted = true;
                self.approval_status = ApprovalStatus::Pending;
                self.current_approval_level = 0;
                self.approvals = e
                    .assignments
                    .iter()
                    .copied()
                    .map(PurchaseOrderApproval::pending)
                    .collect();
            }
            PurchaseOrderEvent::ApprovalGranted(e) => {
                if let Some(row) = self
                    .approvals
                    .iter_mut()
                    .find(|r| r.level == e.level && r.approver_id == e.approver_id)
                {
                    row.status = ApprovalDecision::Approved;
                    row.comments = e.comments.clone();
                    row.decided_at = Some(e.occurred_at);
                }
                self.current_approval_level = e.current_approval_level;
                self.approval_status = e.approval_status;
            }
            PurchaseOrderEvent::ApprovalDenied(e) => {
                if let Some(row) = self
                    .approvals
                    .iter_mut()
                    .find(|r| r.level == e.level && r.approver_id == e.approver_id)
                {
                    row.status = ApprovalDecision::Rejected;
                    row.comments = Some(e.reason.clone());
                    row.decided_at = Some(e.occurred_at);
                }
                self.approval_status = ApprovalStatus::Rejected;
                self.submitted = false;
            }
            PurchaseOrderEvent::PurchaseOrderSent(_) => {
                self.status = PurchaseOrderStatus::Sent;
            }
            PurchaseOrderEvent::PurchaseOrderConfirmed(e) => {
                self.status = PurchaseOrderStatus::Confirmed;
                if e.expected_delivery_date.is_some() {
                    self.expected_delivery_date = e.expected_delivery_date;
                }
            }
            PurchaseOrderEvent::LineItemReceived(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == e.line_id) {
                    line.quantity_received = e.quantity_received;
                }
                self.status = e.status;
                self.actual_delivery_date = Some(e.received_on);
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => {
                self.status = PurchaseOrderStatus::Cancelled;
            }
            PurchaseOrderEvent::PurchaseOrderClosed(_) => {
                self.status = PurchaseOrderStatus::Closed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLineItem(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::UpdateLineItem(cmd) => self.handle_update_line(cmd),
            PurchaseOrderCommand::RemoveLineItem(cmd) => self.handle_remove_line(cmd),
            PurchaseOrderCommand::SetCharges(cmd) => self.handle_set_charges(cmd),
            PurchaseOrderCommand::SubmitForApproval(cmd) => self.handle_submit(cmd),
            PurchaseOrderCommand::ApprovePurchaseOrder(cmd) => self.handle_approve(cmd),
            PurchaseOrderCommand::RejectPurchaseOrder(cmd) => self.handle_reject(cmd),
            PurchaseOrderCommand::SendPurchaseOrder(cmd) => self.handle_send(cmd),
            PurchaseOrderCommand::ConfirmPurchaseOrder(cmd) => self.handle_confirm(cmd),
            PurchaseOrderCommand::ReceiveLineItem(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::CancelPurchaseOrder(cmd) => self.handle_cancel(cmd),
            PurchaseOrderCommand::ClosePurchaseOrder(cmd) => self.handle_close(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_business(&self, business_id: BusinessId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.business_id != Some(business_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_target(&self, business_id: BusinessId, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_business(business_id)?;
        self.ensure_order_id(order_id)
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if !self.is_editable() {
            return Err(DomainError::invariant(format!(
                "purchase order cannot be edited while {} with approval {}",
                self.status.as_str(),
                self.approval_status.as_str()
            )));
        }
        Ok(())
    }

    fn existing_line(&self, line_id: LineItemId) -> Result<&PurchaseOrderLineItem, DomainError> {
        self.line(line_id).ok_or(DomainError::NotFound)
    }

    fn handle_create(&self, cmd: &CreatePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        if cmd.order_number.trim().is_empty() {
            return Err(DomainError::validation("order number cannot be empty"));
        }
        if let Some(expected) = cmd.expected_delivery_date {
            if expected < cmd.order_date {
                return Err(DomainError::validation(
                    "expected delivery date precedes the order date",
                ));
            }
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(PurchaseOrderCreated {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            supplier_id: cmd.supplier_id,
            order_number: cmd.order_number.trim().to_string(),
            order_date: cmd.order_date,
            expected_delivery_date: cmd.expected_delivery_date,
            required_approval_levels: cmd.required_approval_levels,
            approval_status: ApprovalStatus::initial(cmd.required_approval_levels),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLineItem) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        self.ensure_editable()?;
        validate_line(cmd.quantity_ordered, cmd.unit_cost)?;
        if self.line(cmd.line_id).is_some() {
            return Err(DomainError::conflict(format!("line item {} already exists", cmd.line_id)));
        }

        let line = PurchaseOrderLineItem {
            line_id: cmd.line_id,
            line_no: self.next_line_no,
            product_id: cmd.product_id,
            description: cmd.description.clone(),
            quantity_ordered: cmd.quantity_ordered,
            quantity_received: 0,
            unit_cost: cmd.unit_cost,
        };
        let mut lines = self.lines.clone();
        lines.push(line.clone());

        Ok(vec![PurchaseOrderEvent::LineItemAdded(LineItemAdded {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            line,
            totals: OrderTotals::compute(&lines, self.tax_rate, self.totals.shipping_amount)?,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_line(&self, cmd: &UpdateLineItem) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        self.ensure_editable()?;
        self.existing_line(cmd.line_id)?;
        validate_line(cmd.quantity_ordered, cmd.unit_cost)?;

        let lines: Vec<_> = self
            .lines
            .iter()
            .cloned()
            .map(|mut l| {
                if l.line_id == cmd.line_id {
                    l.quantity_ordered = cmd.quantity_ordered;
                    l.unit_cost = cmd.unit_cost;
                }
                l
            })
            .collect();

        Ok(vec![PurchaseOrderEvent::LineItemUpdated(LineItemUpdated {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            line_id: cmd.line_id,
            quantity_ordered: cmd.quantity_ordered,
            unit_cost: cmd.unit_cost,
            totals: OrderTotals::compute(&lines, self.tax_rate, self.totals.shipping_amount)?,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLineItem) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        self.ensure_editable()?;
        self.existing_line(cmd.line_id)?;

        let lines: Vec<_> = self.lines.iter().filter(|l| l.line_id != cmd.line_id).cloned().collect();

        Ok(vec![PurchaseOrderEvent::LineItemRemoved(LineItemRemoved {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            line_id: cmd.line_id,
            totals: OrderTotals::compute(&lines, self.tax_rate, self.totals.shipping_amount)?,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_charges(&self, cmd: &SetCharges) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        self.ensure_editable()?;
        if cmd.tax_rate.is_sign_negative() || cmd.tax_rate > Decimal::ONE {
            return Err(DomainError::validation("tax rate must be within 0..=1"));
        }
        if cmd.shipping_amount.is_sign_negative() {
            return Err(DomainError::validation("shipping amount cannot be negative"));
        }
        check_cost_bound(cmd.shipping_amount, "shipping amount")?;

        Ok(vec![PurchaseOrderEvent::ChargesSet(ChargesSet {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            tax_rate: cmd.tax_rate,
            totals: OrderTotals::compute(&self.lines, cmd.tax_rate, cmd.shipping_amount)?,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitForApproval) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        self.ensure_editable()?;
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot submit purchase order without lines",
            ));
        }
        validate_assignments(self.required_approval_levels, &cmd.assignments)?;

        Ok(vec![PurchaseOrderEvent::SubmittedForApproval(SubmittedForApproval {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            assignments: cmd.assignments.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn ensure_awaiting_approval(&self) -> Result<(), DomainError> {
        if self.status != PurchaseOrderStatus::Draft
            || !self.submitted
            || self.approval_status != ApprovalStatus::Pending
        {
            return Err(DomainError::invariant(format!(
                "purchase order is not awaiting approval (approval {})",
                self.approval_status.as_str()
            )));
        }
        Ok(())
    }

    fn handle_approve(&self, cmd: &ApprovePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        self.ensure_awaiting_approval()?;

        let step = approve_step(
            &self.approvals,
            self.required_approval_levels,
            self.current_approval_level,
            cmd.approver_id,
        )?;

        Ok(vec![PurchaseOrderEvent::ApprovalGranted(ApprovalGranted {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            approver_id: cmd.approver_id,
            level: step.level,
            comments: cmd.comments.clone(),
            current_approval_level: step.current_approval_level,
            approval_status: step.approval_status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectPurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        self.ensure_awaiting_approval()?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }
        let level = rejection_level(&self.approvals, cmd.approver_id)?;

        Ok(vec![PurchaseOrderEvent::ApprovalDenied(ApprovalDenied {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            approver_id: cmd.approver_id,
            level,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendPurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant(format!(
                "only draft purchase orders can be sent (status {})",
                self.status.as_str()
            )));
        }
        match self.approval_status {
            ApprovalStatus::Rejected => return Err(DomainError::ApprovalRejected),
            ApprovalStatus::Pending => return Err(DomainError::ApprovalPending),
            ApprovalStatus::Approved | ApprovalStatus::NotRequired => {}
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot send purchase order without lines"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderSent(PurchaseOrderSent {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            sent_by: cmd.sent_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmPurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        if self.status != PurchaseOrderStatus::Sent {
            return Err(DomainError::invariant(format!(
                "only sent purchase orders can be confirmed (status {})",
                self.status.as_str()
            )));
        }
        if let (Some(expected), Some(ordered)) = (cmd.expected_delivery_date, self.order_date) {
            if expected < ordered {
                return Err(DomainError::validation(
                    "expected delivery date precedes the order date",
                ));
            }
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderConfirmed(PurchaseOrderConfirmed {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            expected_delivery_date: cmd.expected_delivery_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveLineItem) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        if !self.status.accepts_receipts() {
            return Err(DomainError::invariant(format!(
                "cannot receive against a purchase order that is {}",
                self.status.as_str()
            )));
        }
        let line = self.existing_line(cmd.line_id)?;
        line.check_receipt(cmd.quantity)?;
        if let Some(cost) = cmd.unit_cost {
            if cost.is_sign_negative() {
                return Err(DomainError::validation("unit cost cannot be negative"));
            }
            check_cost_bound(cost, "unit cost")?;
        }

        let lines: Vec<_> = self
            .lines
            .iter()
            .cloned()
            .map(|mut l| {
                if l.line_id == cmd.line_id {
                    l.quantity_received += cmd.quantity;
                }
                l
            })
            .collect();
        let quantity_received = line.quantity_received + cmd.quantity;

        Ok(vec![PurchaseOrderEvent::LineItemReceived(LineItemReceived {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            line_id: cmd.line_id,
            product_id: line.product_id,
            movement_id: cmd.movement_id,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost.unwrap_or(line.unit_cost),
            quantity_received,
            quantity_remaining: line.quantity_ordered - quantity_received,
            status: derive_status(&lines, self.status),
            received_on: cmd.received_on,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelPurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        if !matches!(
            self.status,
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Sent | PurchaseOrderStatus::Confirmed
        ) {
            return Err(DomainError::invariant(format!(
                "cannot cancel a purchase order that is {}",
                self.status.as_str()
            )));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(PurchaseOrderCancelled {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &ClosePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_target(cmd.business_id, cmd.order_id)?;
        if !matches!(
            self.status,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::PartiallyReceived
        ) {
            return Err(DomainError::invariant(format!(
                "only received purchase orders can be closed (status {})",
                self.status.as_str()
            )));
        }
        let supplier_id = self
            .supplier_id
            .ok_or_else(|| DomainError::invariant("supplier must be set"))?;

        let delivered_on_time = match (self.actual_delivery_date, self.expected_delivery_date) {
            (Some(actual), Some(expected)) => actual <= expected,
            _ => true,
        };

        Ok(vec![PurchaseOrderEvent::PurchaseOrderClosed(PurchaseOrderClosed {
            business_id: cmd.business_id,
            order_id: cmd.order_id,
            supplier_id,
            delivered_on_time,
            fill_rate: fill_rate(&self.lines),
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn validate_line(quantity_ordered: i64, unit_cost: Decimal) -> Result<(), DomainError> {
    if quantity_ordered <= 0 {
        return Err(DomainError::validation("quantity ordered must be positive"));
    }
    if unit_cost.is_sign_negative() {
        return Err(DomainError::validation("unit cost cannot be negative"));
    }
    check_quantity_bound(quantity_ordered, "quantity ordered")?;
    check_cost_bound(unit_cost, "unit cost")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldstock_events::execute;
    use rust_decimal_macros::dec;

    struct Fixture {
        order: PurchaseOrder,
        business_id: BusinessId,
        order_id: PurchaseOrderId,
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    impl Fixture {
        fn new(required_approval_levels: u32) -> Self {
            let business_id = BusinessId::new();
            let order_id = PurchaseOrderId::generate();
            let mut order = PurchaseOrder::empty(order_id);
            execute(
                &mut order,
                &PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    business_id,
                    order_id,
                    supplier_id: SupplierId::generate(),
                    order_number: "PO-1001".to_string(),
                    order_date: date(1),
                    expected_delivery_date: Some(date(10)),
                    required_approval_levels,
                    notes: None,
                    occurred_at: test_time(),
                }),
            )
            .unwrap();
            Self { order, business_id, order_id }
        }

        fn run(&mut self, cmd: PurchaseOrderCommand) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            execute(&mut self.order, &cmd)
        }

        fn add_line(&mut self, quantity: i64, unit_cost: Decimal) -> LineItemId {
            let line_id = LineItemId::generate();
            self.run(PurchaseOrderCommand::AddLineItem(AddLineItem {
                business_id: self.business_id,
                order_id: self.order_id,
                line_id,
                product_id: ProductId::generate(),
                description: None,
                quantity_ordered: quantity,
                unit_cost,
                occurred_at: test_time(),
            }))
            .unwrap();
            line_id
        }

        fn submit(&mut self, assignments: Vec<ApprovalAssignment>) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            self.run(PurchaseOrderCommand::SubmitForApproval(SubmitForApproval {
                business_id: self.business_id,
                order_id: self.order_id,
                assignments,
                occurred_at: test_time(),
            }))
        }

        fn approve(&mut self, approver_id: UserId) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            self.run(PurchaseOrderCommand::ApprovePurchaseOrder(ApprovePurchaseOrder {
                business_id: self.business_id,
                order_id: self.order_id,
                approver_id,
                comments: None,
                occurred_at: test_time(),
            }))
        }

        fn send(&mut self) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            self.run(PurchaseOrderCommand::SendPurchaseOrder(SendPurchaseOrder {
                business_id: self.business_id,
                order_id: self.order_id,
                sent_by: None,
                occurred_at: test_time(),
            }))
        }

        fn receive(&mut self, line_id: LineItemId, quantity: i64, day: u32) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            self.run(PurchaseOrderCommand::ReceiveLineItem(ReceiveLineItem {
                business_id: self.business_id,
                order_id: self.order_id,
                line_id,
                quantity,
                unit_cost: None,
                movement_id: MovementId::generate(),
                received_on: date(day),
                occurred_at: test_time(),
            }))
        }

        fn close(&mut self) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            self.run(PurchaseOrderCommand::ClosePurchaseOrder(ClosePurchaseOrder {
                business_id: self.business_id,
                order_id: self.order_id,
                occurred_at: test_time(),
            }))
        }
    }

    #[test]
    fn order_without_required_levels_can_be_sent_directly() {
        let mut f = Fixture::new(0);
        assert_eq!(f.order.approval_status(), ApprovalStatus::NotRequired);
        f.add_line(3, dec!(10));
        f.send().unwrap();
        assert_eq!(f.order.status(), PurchaseOrderStatus::Sent);
    }

    #[test]
    fn two_level_approval_gates_sending() {
        let mut f = Fixture::new(2);
        f.add_line(5, dec!(4));
        let (first, second) = (UserId::new(), UserId::new());
        f.submit(vec![
            ApprovalAssignment { level: 1, approver_id: first },
            ApprovalAssignment { level: 2, approver_id: second },
        ])
        .unwrap();

        f.approve(first).unwrap();
        assert_eq!(f.order.current_approval_level(), 1);
        assert_eq!(f.order.approval_status(), ApprovalStatus::Pending);
        assert_eq!(f.send().unwrap_err(), DomainError::ApprovalPending);

        f.approve(second).unwrap();
        assert_eq!(f.order.current_approval_level(), 2);
        assert_eq!(f.order.approval_status(), ApprovalStatus::Approved);
        f.send().unwrap();
        assert_eq!(f.order.status(), PurchaseOrderStatus::Sent);
        assert!(f.order.current_approval_level() <= f.order.required_approval_levels());
    }

    #[test]
    fn rejection_blocks_sending_until_resubmitted() {
        let mut f = Fixture::new(1);
        let line_id = f.add_line(5, dec!(4));
        let approver = UserId::new();
        let assignments = vec![ApprovalAssignment { level: 1, approver_id: approver }];
        f.submit(assignments.clone()).unwrap();

        f.run(PurchaseOrderCommand::RejectPurchaseOrder(RejectPurchaseOrder {
            business_id: f.business_id,
            order_id: f.order_id,
            approver_id: approver,
            reason: "price too high".to_string(),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.order.approval_status(), ApprovalStatus::Rejected);
        assert_eq!(f.send().unwrap_err(), DomainError::ApprovalRejected);

        f.run(PurchaseOrderCommand::UpdateLineItem(UpdateLineItem {
            business_id: f.business_id,
            order_id: f.order_id,
            line_id,
            quantity_ordered: 5,
            unit_cost: dec!(3),
            occurred_at: test_time(),
        }))
        .unwrap();
        f.submit(assignments).unwrap();
        f.approve(approver).unwrap();
        f.send().unwrap();
    }

    #[test]
    fn lines_are_frozen_while_awaiting_approval() {
        let mut f = Fixture::new(1);
        f.add_line(1, dec!(1));
        f.submit(vec![ApprovalAssignment { level: 1, approver_id: UserId::new() }])
            .unwrap();
        let err = f
            .run(PurchaseOrderCommand::AddLineItem(AddLineItem {
                business_id: f.business_id,
                order_id: f.order_id,
                line_id: LineItemId::generate(),
                product_id: ProductId::generate(),
                description: None,
                quantity_ordered: 1,
                unit_cost: dec!(1),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn totals_follow_line_edits() {
        let mut f = Fixture::new(0);
        let a = f.add_line(2, dec!(10));
        f.add_line(1, dec!(5));
        f.run(PurchaseOrderCommand::SetCharges(SetCharges {
            business_id: f.business_id,
            order_id: f.order_id,
            tax_rate: dec!(0.10),
            shipping_amount: dec!(7.50),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.order.totals().subtotal, dec!(25));
        assert_eq!(f.order.totals().total_amount, dec!(35.00));

        f.run(PurchaseOrderCommand::RemoveLineItem(RemoveLineItem {
            business_id: f.business_id,
            order_id: f.order_id,
            line_id: a,
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.order.totals().subtotal, dec!(5));
        assert_eq!(f.order.totals().tax_amount, dec!(0.50));
        assert_eq!(f.order.totals().total_amount, dec!(13.00));
    }

    #[test]
    fn oversized_lines_and_charges_are_rejected() {
        let mut f = Fixture::new(0);
        let add = |f: &Fixture, quantity_ordered: i64, unit_cost: Decimal| {
            PurchaseOrderCommand::AddLineItem(AddLineItem {
                business_id: f.business_id,
                order_id: f.order_id,
                line_id: LineItemId::generate(),
                product_id: ProductId::generate(),
                description: None,
                quantity_ordered,
                unit_cost,
                occurred_at: test_time(),
            })
        };
        let cmd = add(&f, 9_000_000_000_000_000_000, dec!(10000000000));
        assert!(matches!(f.run(cmd), Err(DomainError::Validation(_))));
        let cmd = add(&f, i64::MAX, dec!(1));
        assert!(matches!(f.run(cmd), Err(DomainError::Validation(_))));
        let cmd = add(&f, 1, Decimal::MAX);
        assert!(matches!(f.run(cmd), Err(DomainError::Validation(_))));
        assert!(f.order.lines().is_empty());

        let line_id = f.add_line(1, dec!(1));
        let err = f
            .run(PurchaseOrderCommand::SetCharges(SetCharges {
                business_id: f.business_id,
                order_id: f.order_id,
                tax_rate: dec!(0),
                shipping_amount: Decimal::MAX,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(f.order.totals().total_amount, dec!(1));

        f.send().unwrap();
        let err = f
            .run(PurchaseOrderCommand::ReceiveLineItem(ReceiveLineItem {
                business_id: f.business_id,
                order_id: f.order_id,
                line_id,
                quantity: 1,
                unit_cost: Some(Decimal::MAX),
                movement_id: MovementId::generate(),
                received_on: date(5),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn partial_then_full_receipt_with_over_receipt_rejected() {
        let mut f = Fixture::new(0);
        let line_id = f.add_line(10, dec!(2));
        f.send().unwrap();

        f.receive(line_id, 6, 5).unwrap();
        assert_eq!(f.order.status(), PurchaseOrderStatus::PartiallyReceived);

        let err = f.receive(line_id, 5, 6).unwrap_err();
        assert_eq!(err, DomainError::OverReceipt { requested: 5, remaining: 4 });

        let events = f.receive(line_id, 4, 7).unwrap();
        match &events[0] {
            PurchaseOrderEvent::LineItemReceived(e) => {
                assert_eq!(e.quantity_remaining, 0);
                assert_eq!(e.unit_cost, dec!(2));
            }
            other => panic!("unexpected event {other:?}"),
        }
        let line = f.order.line(line_id).unwrap();
        assert!(line.is_fully_received());
        assert_eq!(f.order.status(), PurchaseOrderStatus::Received);
    }

    #[test]
    fn cannot_receive_before_sending() {
        let mut f = Fixture::new(0);
        let line_id = f.add_line(10, dec!(2));
        assert!(matches!(f.receive(line_id, 1, 2), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn close_reports_delivery_performance() {
        let mut f = Fixture::new(0);
        let a = f.add_line(10, dec!(2));
        f.add_line(10, dec!(3));
        f.send().unwrap();
        f.receive(a, 10, 12).unwrap();

        let events = f.close().unwrap();
        match &events[0] {
            PurchaseOrderEvent::PurchaseOrderClosed(e) => {
                assert!(!e.delivered_on_time);
                assert_eq!(e.fill_rate, dec!(50));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(f.order.status(), PurchaseOrderStatus::Closed);
    }

    #[test]
    fn cancel_is_only_possible_before_receipts() {
        let mut f = Fixture::new(0);
        let line_id = f.add_line(2, dec!(1));
        f.send().unwrap();
        f.receive(line_id, 1, 3).unwrap();
        let err = f
            .run(PurchaseOrderCommand::CancelPurchaseOrder(CancelPurchaseOrder {
                business_id: f.business_id,
                order_id: f.order_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
