//! Members (borrowers) and their enrollment status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use kopa_shared::types::{LedgerAccountId, MemberId, Money};

/// Member status, driven by the external approval workflow.
///
/// Only `Active` members may borrow or move money out of their accounts.
/// A `Pending` member may still deposit; the deposit that clears the
/// registration fee activates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Enrolled, registration not yet settled.
    Pending,
    /// Fully active.
    Active,
    /// Blocked by an administrator.
    Blocked,
}

impl MemberStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Blocked => "blocked",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" | "inactive" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Whether money may leave this member's accounts.
    #[must_use]
    pub fn can_transact(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the member may deposit.
    #[must_use]
    pub fn can_deposit(&self) -> bool {
        !matches!(self, Self::Blocked)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A borrower with exactly one savings account and at most one drawdown account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// Member ID.
    pub id: MemberId,
    /// Reference into the identity/membership system (e.g., national ID or member code).
    pub identity_ref: String,
    /// Display name.
    pub full_name: String,
    /// Current status.
    pub status: MemberStatus,
    /// The savings account provisioned at enrollment.
    pub savings_account_id: LedgerAccountId,
    /// The drawdown account, when one was provisioned.
    pub drawdown_account_id: Option<LedgerAccountId>,
    /// Registration fee still owed; cleared from deposits.
    pub registration_fee_due: Money,
    /// Enrollment time.
    pub enrolled_at: DateTime<Utc>,
    /// When the member first became active.
    pub activated_at: Option<DateTime<Utc>>,
}

impl Member {
    /// Marks the member active, keeping the first activation time.
    pub(crate) fn activate(&mut self, at: DateTime<Utc>) {
        self.status = MemberStatus::Active;
        self.activated_at.get_or_insert(at);
    }
}

/// Input for enrolling a member.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMember {
    /// Reference into the identity/membership system.
    pub identity_ref: String,
    /// Display name.
    pub full_name: String,
}
