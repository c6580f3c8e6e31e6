//! Loan domain types: products, snapshotted terms, status and the loan aggregate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use kopa_shared::types::{ActorId, LoanId, LoanTypeId, MemberId, Money};

use super::error::LoanError;

/// How interest accrues over the loan's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestModel {
    /// Simple interest on the original principal for every month.
    Flat,
    /// Amortized annuity (equal monthly installments).
    ReducingBalance,
    /// Monthly compounding on the whole balance.
    Compound,
}

impl InterestModel {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::ReducingBalance => "reducing_balance",
            Self::Compound => "compound",
        }
    }

    /// Parses a model from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "flat" => Some(Self::Flat),
            "reducing_balance" | "reducing" => Some(Self::ReducingBalance),
            "compound" => Some(Self::Compound),
            _ => None,
        }
    }
}

impl fmt::Display for InterestModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A loan product.
///
/// Loans copy the values they need into [`LoanTerms`] at creation, so later
/// edits to a product never change existing loans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanType {
    /// Product ID.
    pub id: LoanTypeId,
    /// Product name.
    pub name: String,
    /// Interest rate in percent per month.
    pub interest_rate: Decimal,
    /// Interest model.
    pub interest_model: InterestModel,
    /// Fee as a percentage of principal.
    pub charge_fee_percentage: Decimal,
    /// Smallest principal accepted.
    pub min_amount: Money,
    /// Largest principal accepted.
    pub max_amount: Money,
    /// Duration in months.
    pub duration_months: u32,
    /// Days after the due date before penalties apply.
    pub grace_period_days: u32,
    /// Penalty in percent of outstanding per overdue month.
    pub penalty_rate: Decimal,
    /// When the product was registered.
    pub created_at: DateTime<Utc>,
}

/// Input for registering a loan product.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLoanType {
    /// Product name.
    pub name: String,
    /// Interest rate in percent per month.
    pub interest_rate: Decimal,
    /// Interest model.
    pub interest_model: InterestModel,
    /// Fee as a percentage of principal.
    #[serde(default)]
    pub charge_fee_percentage: Decimal,
    /// Smallest principal accepted.
    pub min_amount: Decimal,
    /// Largest principal accepted.
    pub max_amount: Decimal,
    /// Duration in months.
    pub duration_months: u32,
    /// Days after the due date before penalties apply.
    #[serde(default)]
    pub grace_period_days: u32,
    /// Penalty in percent of outstanding per overdue month.
    #[serde(default)]
    pub penalty_rate: Decimal,
}

impl LoanType {
    /// Validates a product definition.
    pub fn validate(&self) -> Result<(), LoanError> {
        if self.name.trim().is_empty() {
            return Err(LoanError::Validation("loan type name is required".into()));
        }
        if self.interest_rate < Decimal::ZERO {
            return Err(LoanError::Validation("interest rate cannot be negative".into()));
        }
        if self.charge_fee_percentage < Decimal::ZERO {
            return Err(LoanError::Validation("charge fee cannot be negative".into()));
        }
        if self.penalty_rate < Decimal::ZERO {
            return Err(LoanError::Validation("penalty rate cannot be negative".into()));
        }
        if self.duration_months == 0 {
            return Err(LoanError::Validation(
                "duration must be at least one month".into(),
            ));
        }
        if !self.min_amount.is_positive() {
            return Err(LoanError::Validation("minimum amount must be positive".into()));
        }
        if self.min_amount.try_cmp(&self.max_amount)?.is_gt() {
            return Err(LoanError::Validation(
                "minimum amount exceeds maximum amount".into(),
            ));
        }
        Ok(())
    }

    /// Snapshot of the values a loan needs for its whole life.
    #[must_use]
    pub fn terms(&self) -> LoanTerms {
        LoanTerms {
            loan_type_id: self.id,
            interest_rate: self.interest_rate,
            interest_model: self.interest_model,
            charge_fee_percentage: self.charge_fee_percentage,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            duration_months: self.duration_months,
            grace_period_days: self.grace_period_days,
            penalty_rate: self.penalty_rate,
        }
    }
}

/// Product values copied onto a loan at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    /// Product the terms were copied from.
    pub loan_type_id: LoanTypeId,
    /// Interest rate in percent per month.
    pub interest_rate: Decimal,
    /// Interest model.
    pub interest_model: InterestModel,
    /// Fee as a percentage of principal.
    pub charge_fee_percentage: Decimal,
    /// Smallest principal accepted.
    pub min_amount: Money,
    /// Largest principal accepted.
    pub max_amount: Money,
    /// Duration in months.
    pub duration_months: u32,
    /// Days after the due date before penalties apply.
    pub grace_period_days: u32,
    /// Penalty in percent of outstanding per overdue month.
    pub penalty_rate: Decimal,
}

/// Computed cost of a loan, rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanQuote {
    /// Principal borrowed.
    pub principal: Money,
    /// Interest over the full duration.
    pub interest: Money,
    /// One-off charge fee.
    pub fee: Money,
    /// Principal plus interest.
    pub total: Money,
    /// Monthly installment (EMI for reducing balance).
    pub installment: Money,
}

/// Loan status.
///
/// Valid transitions:
/// - Draft → Pending (submit)
/// - Pending → Approved (approve) | Rejected (reject)
/// - Approved → Disbursed (disburse)
/// - Disbursed → Completed (outstanding reaches zero) | Defaulted (mark_defaulted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// Created, not yet submitted.
    Draft,
    /// Submitted, awaiting a decision.
    Pending,
    /// Approved, awaiting disbursement.
    Approved,
    /// Rejected (terminal).
    Rejected,
    /// Money paid out; repayments accepted.
    Disbursed,
    /// Fully repaid (terminal).
    Completed,
    /// Written off as defaulted (terminal).
    Defaulted,
}

impl LoanStatus {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Disbursed => "disbursed",
            Self::Completed => "completed",
            Self::Defaulted => "defaulted",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "disbursed" => Some(Self::Disbursed),
            "completed" => Some(Self::Completed),
            "defaulted" => Some(Self::Defaulted),
            _ => None,
        }
    }

    /// Returns true if the loan still counts against the member's credit limit.
    #[must_use]
    pub fn is_exposure(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Disbursed)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle actions, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanAction {
    /// Draft → Pending.
    Submit,
    /// Pending → Approved.
    Approve,
    /// Pending → Rejected.
    Reject,
    /// Approved → Disbursed.
    Disburse,
    /// Repayment against a disbursed loan.
    Repay,
    /// Disbursed → Defaulted.
    MarkDefaulted,
    /// Penalty accrual on an overdue loan.
    AccruePenalty,
}

impl fmt::Display for LoanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Disburse => "disburse",
            Self::Repay => "repay",
            Self::MarkDefaulted => "mark_defaulted",
            Self::AccruePenalty => "accrue_penalty",
        };
        write!(f, "{s}")
    }
}

/// The loan aggregate.
///
/// Invariants: `outstanding_balance >= 0`, and `outstanding_balance == 0`
/// exactly when the status is `Completed` (before disbursement nothing is
/// outstanding and the balance is not yet tracked).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    /// Loan ID.
    pub id: LoanId,
    /// Human-facing loan number.
    pub loan_number: String,
    /// Borrower.
    pub member_id: MemberId,
    /// Snapshotted product terms.
    pub terms: LoanTerms,
    /// Principal borrowed.
    pub principal: Money,
    /// Interest over the full duration.
    pub interest: Money,
    /// Charge fee.
    pub fee: Money,
    /// Monthly installment.
    pub installment: Money,
    /// Principal + interest + fee.
    pub total_payable: Money,
    /// Amount still owed; set at disbursement.
    pub outstanding_balance: Money,
    /// Sum of penalties added to the outstanding balance.
    pub penalty_accrued: Money,
    /// Overdue months already penalised.
    pub penalty_months_charged: u32,
    /// Sum of repayments applied.
    pub amount_repaid: Money,
    /// Current status.
    pub status: LoanStatus,
    /// Who applied.
    pub applied_by: ActorId,
    /// Application time.
    pub applied_at: DateTime<Utc>,
    /// Submission time.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Approver.
    pub approved_by: Option<ActorId>,
    /// Approval time.
    pub approved_at: Option<DateTime<Utc>>,
    /// Rejecting actor.
    pub rejected_by: Option<ActorId>,
    /// Rejection time.
    pub rejected_at: Option<DateTime<Utc>>,
    /// Rejection reason.
    pub rejection_reason: Option<String>,
    /// Disbursing actor.
    pub disbursed_by: Option<ActorId>,
    /// Disbursement time.
    pub disbursed_at: Option<DateTime<Utc>>,
    /// Due date (disbursement + duration).
    pub due_date: Option<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Default time.
    pub defaulted_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// Amount this loan counts against the member's credit limit.
    ///
    /// Undisbursed applications reserve their principal; disbursed loans
    /// count their outstanding balance.
    #[must_use]
    pub fn exposure(&self) -> Money {
        if !self.status.is_exposure() {
            return Money::zero(self.principal.currency);
        }
        if self.status == LoanStatus::Disbursed {
            self.outstanding_balance
        } else {
            self.principal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopa_shared::types::Currency;
    use rust_decimal_macros::dec;

    fn product() -> LoanType {
        LoanType {
            id: LoanTypeId::new(),
            name: "Biashara".to_string(),
            interest_rate: dec!(2),
            interest_model: InterestModel::ReducingBalance,
            charge_fee_percentage: dec!(1),
            min_amount: Money::new(dec!(1000), Currency::Kes),
            max_amount: Money::new(dec!(100000), Currency::Kes),
            duration_months: 12,
            grace_period_days: 7,
            penalty_rate: dec!(1.5),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_product() {
        assert!(product().validate().is_ok());
    }

    #[test]
    fn test_invalid_products() {
        let mut p = product();
        p.duration_months = 0;
        assert!(matches!(p.validate(), Err(LoanError::Validation(_))));

        let mut p = product();
        p.interest_rate = dec!(-1);
        assert!(p.validate().is_err());

        let mut p = product();
        p.min_amount = Money::new(dec!(200000), Currency::Kes);
        assert!(p.validate().is_err());

        let mut p = product();
        p.max_amount = Money::new(dec!(100000), Currency::Usd);
        assert!(matches!(p.validate(), Err(LoanError::Money(_))));
    }

    #[test]
    fn test_terms_snapshot_is_detached() {
        let mut p = product();
        let terms = p.terms();
        p.interest_rate = dec!(9);
        assert_eq!(terms.interest_rate, dec!(2));
        assert_eq!(terms.loan_type_id, p.id);
    }

    #[test]
    fn test_status_flags() {
        assert!(!LoanStatus::Completed.is_exposure());
        assert!(LoanStatus::Disbursed.is_exposure());
        assert!(LoanStatus::Approved.is_exposure());
        assert!(!LoanStatus::Draft.is_exposure());
        assert_eq!(LoanStatus::parse("DISBURSED"), Some(LoanStatus::Disbursed));
        assert_eq!(InterestModel::parse("reducing"), Some(InterestModel::ReducingBalance));
    }
}
