//! Multi-level approval chain for purchase orders.
//!
//! Levels are numbered from 1. Level `n` clears once every approver assigned
//! to it has approved; `current_approval_level` is the highest cleared level.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldstock_core::{DomainError, UserId};

/// Overall approval state of a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    NotRequired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::NotRequired => "not_required",
        }
    }

    /// Initial status for an order needing `required_levels` sign-offs.
    pub fn initial(required_levels: u32) -> Self {
        if required_levels == 0 {
            ApprovalStatus::NotRequired
        } else {
            ApprovalStatus::Pending
        }
    }
}

/// Decision state of one approver's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
}

/// Approver assigned to one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalAssignment {
    pub level: u32,
    pub approver_id: UserId,
}

/// One row per `(order, level, approver)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderApproval {
    pub level: u32,
    pub approver_id: UserId,
    pub status: ApprovalDecision,
    pub comments: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl PurchaseOrderApproval {
    pub fn pending(assignment: ApprovalAssignment) -> Self {
        Self {
            level: assignment.level,
            approver_id: assignment.approver_id,
            status: ApprovalDecision::Pending,
            comments: None,
            decided_at: None,
        }
    }
}

/// Outcome of one approval at the next open level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalStep {
    pub level: u32,
    /// Every approver at `level` has now approved.
    pub level_cleared: bool,
    pub current_approval_level: u32,
    pub approval_status: ApprovalStatus,
}

/// Check a set of assignments against the number of required levels.
pub fn validate_assignments(
    required_levels: u32,
    assignments: &[ApprovalAssignment],
) -> Result<(), DomainError> {
    if required_levels == 0 {
        return Err(DomainError::validation(
            "purchase order does not require approval",
        ));
    }

    let mut seen = BTreeSet::new();
    for a in assignments {
        if a.level == 0 || a.level > required_levels {
            return Err(DomainError::validation(format!(
                "approval level {} is outside 1..={required_levels}",
                a.level
            )));
        }
        if !seen.insert((a.level, a.approver_id)) {
            return Err(DomainError::validation(format!(
                "approver {} is assigned twice to level {}",
                a.approver_id, a.level
            )));
        }
    }

    for level in 1..=required_levels {
        if !assignments.iter().any(|a| a.level == level) {
            return Err(DomainError::validation(format!(
                "approval level {level} has no approver"
            )));
        }
    }
    Ok(())
}

/// Record `approver`'s approval at the level after `current_level`.
pub fn approve_step(
    rows: &[PurchaseOrderApproval],
    required_levels: u32,
    current_level: u32,
    approver: UserId,
) -> Result<ApprovalStep, DomainError> {
    let level = current_level + 1;
    if level > required_levels {
        return Err(DomainError::invariant("every approval level has already cleared"));
    }

    let row = rows
        .iter()
        .find(|r| r.level == level && r.approver_id == approver)
        .ok_or_else(|| {
            DomainError::invariant(format!("approver {approver} is not assigned to level {level}"))
        })?;
    if row.status != ApprovalDecision::Pending {
        return Err(DomainError::conflict(format!(
            "approver {approver} has already decided level {level}"
        )));
    }

    let level_cleared = rows
        .iter()
        .filter(|r| r.level == level && r.approver_id != approver)
        .all(|r| r.status == ApprovalDecision::Approved);

    let current_approval_level = if level_cleared { level } else { current_level };
    let approval_status = if current_approval_level == required_levels {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Pending
    };

    Ok(ApprovalStep {
        level,
        level_cleared,
        current_approval_level,
        approval_status,
    })
}

/// Level at which `approver` may reject: their lowest still-pending row.
pub fn rejection_level(rows: &[PurchaseOrderApproval], approver: UserId) -> Result<u32, DomainError> {
    rows.iter()
        .filter(|r| r.approver_id == approver && r.status == ApprovalDecision::Pending)
        .map(|r| r.level)
        .min()
        .ok_or_else(|| {
            DomainError::invariant(format!("approver {approver} has no pending approval to reject"))
        })
}
