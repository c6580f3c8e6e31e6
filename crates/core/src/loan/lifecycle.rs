//! Loan state machine.
//!
//! Every transition checks the current status and all inputs before it
//! writes a single field, so a failed transition leaves the loan untouched.

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;

use kopa_shared::OverpaymentPolicy;
use kopa_shared::types::{ActorId, LoanId, MemberId, Money, MoneyError};

use super::calculator::LoanCalculator;
use super::error::LoanError;
use super::types::{Loan, LoanAction, LoanStatus, LoanType};

/// Result of applying a repayment to a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepaymentOutcome {
    /// Amount that reduced the outstanding balance.
    pub applied: Money,
    /// Part of the offered amount that was not applied.
    pub excess: Money,
    /// Outstanding balance after the repayment.
    pub outstanding: Money,
    /// Whether the loan completed with this repayment.
    pub completed: bool,
}

/// Stateless service for loan status transitions.
pub struct LoanLifecycle;

impl LoanLifecycle {
    /// Creates a draft loan priced from the product's current terms.
    ///
    /// # Errors
    ///
    /// - `Validation` if the product or principal is invalid
    /// - `PrincipalOutOfRange` if the principal is outside the product bounds
    pub fn create_draft(
        id: LoanId,
        loan_number: String,
        member_id: MemberId,
        loan_type: &LoanType,
        principal: Money,
        applied_by: ActorId,
        at: DateTime<Utc>,
    ) -> Result<Loan, LoanError> {
        loan_type.validate()?;
        let terms = loan_type.terms();
        Self::check_range(principal, &terms.min_amount, &terms.max_amount)?;
        let quote = LoanCalculator::compute(principal, &terms)?;
        let total_payable = quote.total.checked_add(quote.fee)?;
        let zero = Money::zero(principal.currency);

        Ok(Loan {
            id,
            loan_number,
            member_id,
            terms,
            principal,
            interest: quote.interest,
            fee: quote.fee,
            installment: quote.installment,
            total_payable,
            outstanding_balance: zero,
            penalty_accrued: zero,
            penalty_months_charged: 0,
            amount_repaid: zero,
            status: LoanStatus::Draft,
            applied_by,
            applied_at: at,
            submitted_at: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            disbursed_by: None,
            disbursed_at: None,
            due_date: None,
            completed_at: None,
            defaulted_at: None,
        })
    }

    /// Draft → Pending.
    ///
    /// Checks the principal against the snapshotted bounds and against
    /// `available` credit.
    ///
    /// # Errors
    ///
    /// - `InvalidLoanState` if the loan is not a draft
    /// - `PrincipalOutOfRange` or `CreditLimitExceeded` on failed checks
    pub fn submit(loan: &mut Loan, available: Money, at: DateTime<Utc>) -> Result<(), LoanError> {
        Self::ensure(loan, LoanStatus::Draft, LoanAction::Submit)?;
        Self::check_range(loan.principal, &loan.terms.min_amount, &loan.terms.max_amount)?;
        if loan.principal.try_cmp(&available)?.is_gt() {
            return Err(LoanError::CreditLimitExceeded {
                requested: loan.principal.amount,
                available: available.amount,
            });
        }

        loan.status = LoanStatus::Pending;
        loan.submitted_at = Some(at);
        Ok(())
    }

    /// Pending → Approved. No ledger effect.
    ///
    /// # Errors
    ///
    /// `InvalidLoanState` unless the loan is pending.
    pub fn approve(loan: &mut Loan, actor: ActorId, at: DateTime<Utc>) -> Result<(), LoanError> {
        Self::ensure(loan, LoanStatus::Pending, LoanAction::Approve)?;
        loan.status = LoanStatus::Approved;
        loan.approved_by = Some(actor);
        loan.approved_at = Some(at);
        Ok(())
    }

    /// Pending → Rejected (terminal).
    ///
    /// # Errors
    ///
    /// - `RejectionReasonRequired` if `reason` is blank
    /// - `InvalidLoanState` unless the loan is pending
    pub fn reject(
        loan: &mut Loan,
        actor: ActorId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LoanError> {
        if reason.trim().is_empty() {
            return Err(LoanError::RejectionReasonRequired);
        }
        Self::ensure(loan, LoanStatus::Pending, LoanAction::Reject)?;
        loan.status = LoanStatus::Rejected;
        loan.rejected_by = Some(actor);
        loan.rejected_at = Some(at);
        loan.rejection_reason = Some(reason.trim().to_string());
        Ok(())
    }

    /// Approved → Disbursed.
    ///
    /// Sets the due date to `at + duration_months` and the outstanding
    /// balance to the total payable. The caller credits the principal.
    ///
    /// # Errors
    ///
    /// `InvalidLoanState` unless the loan is approved.
    pub fn disburse(loan: &mut Loan, actor: ActorId, at: DateTime<Utc>) -> Result<(), LoanError> {
        Self::ensure(loan, LoanStatus::Approved, LoanAction::Disburse)?;
        let due_date = at
            .checked_add_months(Months::new(loan.terms.duration_months))
            .ok_or_else(|| LoanError::Validation("due date out of range".into()))?;

        loan.status = LoanStatus::Disbursed;
        loan.disbursed_by = Some(actor);
        loan.disbursed_at = Some(at);
        loan.due_date = Some(due_date);
        loan.outstanding_balance = loan.total_payable;
        Ok(())
    }

    /// Applies a repayment to a disbursed loan.
    ///
    /// The outstanding balance never drops below zero. Under
    /// [`OverpaymentPolicy::Clamp`] only the outstanding amount is applied
    /// and the rest is reported as `excess`; under
    /// [`OverpaymentPolicy::Reject`] an amount above the outstanding balance
    /// fails. Reaching zero completes the loan.
    ///
    /// # Errors
    ///
    /// - `Validation` if the amount is not positive
    /// - `InvalidLoanState` unless the loan is disbursed
    /// - `Overpayment` under the reject policy
    pub fn apply_repayment(
        loan: &mut Loan,
        amount: Money,
        policy: OverpaymentPolicy,
        at: DateTime<Utc>,
    ) -> Result<RepaymentOutcome, LoanError> {
        if !amount.is_positive() {
            return Err(LoanError::Validation("repayment must be positive".into()));
        }
        Self::ensure(loan, LoanStatus::Disbursed, LoanAction::Repay)?;

        let outstanding = loan.outstanding_balance;
        if amount.try_cmp(&outstanding)?.is_gt() && policy == OverpaymentPolicy::Reject {
            return Err(LoanError::Overpayment {
                amount: amount.amount,
                outstanding: outstanding.amount,
            });
        }
        let applied = amount.try_min(outstanding)?;
        let excess = amount.checked_sub(applied)?;
        let remaining = outstanding.checked_sub(applied)?;
        let repaid = loan.amount_repaid.checked_add(applied)?;

        loan.outstanding_balance = remaining;
        loan.amount_repaid = repaid;
        let completed = remaining.is_zero();
        if completed {
            loan.status = LoanStatus::Completed;
            loan.completed_at = Some(at);
        }

        Ok(RepaymentOutcome {
            applied,
            excess,
            outstanding: remaining,
            completed,
        })
    }

    /// Disbursed → Defaulted.
    ///
    /// # Errors
    ///
    /// `InvalidLoanState` unless the loan is disbursed.
    pub fn mark_defaulted(loan: &mut Loan, at: DateTime<Utc>) -> Result<(), LoanError> {
        Self::ensure(loan, LoanStatus::Disbursed, LoanAction::MarkDefaulted)?;
        loan.status = LoanStatus::Defaulted;
        loan.defaulted_at = Some(at);
        Ok(())
    }

    /// When penalties start: due date plus the grace period.
    #[must_use]
    pub fn penalty_start(loan: &Loan) -> Option<DateTime<Utc>> {
        loan.due_date
            .map(|due| due + Duration::days(i64::from(loan.terms.grace_period_days)))
    }

    /// Days past the penalty start, or zero if not overdue.
    #[must_use]
    pub fn days_overdue(loan: &Loan, as_of: DateTime<Utc>) -> i64 {
        if loan.status != LoanStatus::Disbursed {
            return 0;
        }
        Self::penalty_start(loan)
            .map(|start| (as_of - start).num_days().max(0))
            .unwrap_or(0)
    }

    /// Whether a disbursed loan is past its due date and grace period.
    #[must_use]
    pub fn is_overdue(loan: &Loan, as_of: DateTime<Utc>) -> bool {
        loan.status == LoanStatus::Disbursed
            && Self::penalty_start(loan).is_some_and(|start| as_of > start)
    }

    /// Adds penalties for every full overdue month not yet charged.
    ///
    /// Each month charges `outstanding * penalty_rate / 100` on the balance
    /// at that point, rounded to cents. Returns the total charged.
    ///
    /// # Errors
    ///
    /// `InvalidLoanState` unless the loan is disbursed.
    pub fn accrue_penalty(loan: &mut Loan, as_of: DateTime<Utc>) -> Result<Money, LoanError> {
        Self::ensure(loan, LoanStatus::Disbursed, LoanAction::AccruePenalty)?;
        let currency = loan.outstanding_balance.currency;
        let Some(start) = Self::penalty_start(loan) else {
            return Ok(Money::zero(currency));
        };

        let months = full_months_between(start, as_of);
        if months <= loan.penalty_months_charged || loan.terms.penalty_rate.is_zero() {
            return Ok(Money::zero(currency));
        }

        let rate = loan.terms.penalty_rate / Decimal::ONE_HUNDRED;
        let mut outstanding = loan.outstanding_balance;
        let mut charged = Money::zero(currency);
        for _ in loan.penalty_months_charged..months {
            let amount = outstanding
                .amount
                .checked_mul(rate)
                .ok_or(LoanError::Money(MoneyError::Overflow))?;
            let penalty = Money::new(amount, currency).round_cents();
            outstanding = outstanding.checked_add(penalty)?;
            charged = charged.checked_add(penalty)?;
        }
        let accrued = loan.penalty_accrued.checked_add(charged)?;

        loan.outstanding_balance = outstanding;
        loan.penalty_accrued = accrued;
        loan.penalty_months_charged = months;
        Ok(charged)
    }

    fn ensure(loan: &Loan, expected: LoanStatus, action: LoanAction) -> Result<(), LoanError> {
        if loan.status == expected {
            Ok(())
        } else {
            Err(LoanError::InvalidLoanState {
                loan_id: loan.id,
                status: loan.status,
                action,
            })
        }
    }

    fn check_range(principal: Money, min: &Money, max: &Money) -> Result<(), LoanError> {
        if principal.try_cmp(min)?.is_lt() || principal.try_cmp(max)?.is_gt() {
            return Err(LoanError::PrincipalOutOfRange {
                principal: principal.amount,
                min: min.amount,
                max: max.amount,
            });
        }
        Ok(())
    }
}

/// Number of whole calendar months from `start` to `end` (zero if `end <= start`).
fn full_months_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    let mut months = 0u32;
    while let Some(next) = start.checked_add_months(Months::new(months + 1)) {
        if next > end {
            break;
        }
        months += 1;
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kopa_shared::types::{Currency, LoanTypeId};
    use rust_decimal_macros::dec;

    use crate::loan::types::InterestModel;

    fn kes(amount: Decimal) -> Money {
        Money::new(amount, Currency::Kes)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn product() -> LoanType {
        LoanType {
            id: LoanTypeId::new(),
            name: "Flat 6m".to_string(),
            interest_rate: dec!(2.5),
            interest_model: InterestModel::Flat,
            charge_fee_percentage: dec!(1),
            min_amount: kes(dec!(1000)),
            max_amount: kes(dec!(50000)),
            duration_months: 6,
            grace_period_days: 10,
            penalty_rate: dec!(2),
            created_at: t0(),
        }
    }

    fn draft(principal: Decimal) -> Loan {
        LoanLifecycle::create_draft(
            LoanId::new(),
            "LN-000001".to_string(),
            MemberId::new(),
            &product(),
            kes(principal),
            ActorId::new(),
            t0(),
        )
        .unwrap()
    }

    fn disbursed(principal: Decimal) -> Loan {
        let mut loan = draft(principal);
        let actor = ActorId::new();
        LoanLifecycle::submit(&mut loan, kes(dec!(100000)), t0()).unwrap();
        LoanLifecycle::approve(&mut loan, actor, t0()).unwrap();
        LoanLifecycle::disburse(&mut loan, actor, t0()).unwrap();
        loan
    }

    #[test]
    fn test_draft_is_priced() {
        let loan = draft(dec!(10000));
        assert_eq!(loan.status, LoanStatus::Draft);
        assert_eq!(loan.interest.amount, dec!(1500.00));
        assert_eq!(loan.fee.amount, dec!(100.00));
        assert_eq!(loan.total_payable.amount, dec!(11600.00));
        assert!(loan.outstanding_balance.is_zero());
    }

    #[test]
    fn test_draft_out_of_range() {
        let result = LoanLifecycle::create_draft(
            LoanId::new(),
            "LN-000002".to_string(),
            MemberId::new(),
            &product(),
            kes(dec!(999)),
            ActorId::new(),
            t0(),
        );
        assert!(matches!(result, Err(LoanError::PrincipalOutOfRange { .. })));
    }

    #[test]
    fn test_submit_checks_credit() {
        let mut loan = draft(dec!(10000));
        let err = LoanLifecycle::submit(&mut loan, kes(dec!(9999.99)), t0()).unwrap_err();
        assert!(matches!(err, LoanError::CreditLimitExceeded { .. }));
        assert_eq!(loan.status, LoanStatus::Draft);

        LoanLifecycle::submit(&mut loan, kes(dec!(10000)), t0()).unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
    }

    #[test]
    fn test_happy_path_to_completion() {
        let mut loan = disbursed(dec!(10000));
        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert_eq!(loan.outstanding_balance.amount, dec!(11600.00));
        assert_eq!(
            loan.due_date,
            Some(Utc.with_ymd_and_hms(2025, 7, 15, 9, 0, 0).unwrap())
        );

        let first =
            LoanLifecycle::apply_repayment(&mut loan, kes(dec!(6000)), OverpaymentPolicy::Clamp, t0())
                .unwrap();
        assert!(!first.completed);
        assert_eq!(first.outstanding.amount, dec!(5600.00));

        let last =
            LoanLifecycle::apply_repayment(&mut loan, kes(dec!(5600)), OverpaymentPolicy::Clamp, t0())
                .unwrap();
        assert!(last.completed);
        assert_eq!(loan.status, LoanStatus::Completed);
        assert!(loan.outstanding_balance.is_zero());
        assert_eq!(loan.amount_repaid.amount, dec!(11600.00));
    }

    #[test]
    fn test_overpayment_policies() {
        let mut loan = disbursed(dec!(10000));
        let err = LoanLifecycle::apply_repayment(
            &mut loan,
            kes(dec!(20000)),
            OverpaymentPolicy::Reject,
            t0(),
        )
        .unwrap_err();
        assert!(matches!(err, LoanError::Overpayment { .. }));
        assert_eq!(loan.outstanding_balance.amount, dec!(11600.00));

        let outcome =
            LoanLifecycle::apply_repayment(&mut loan, kes(dec!(20000)), OverpaymentPolicy::Clamp, t0())
                .unwrap();
        assert_eq!(outcome.applied.amount, dec!(11600.00));
        assert_eq!(outcome.excess.amount, dec!(8400.00));
        assert!(outcome.completed);
    }

    #[test]
    fn test_invalid_transitions_leave_loan_untouched() {
        let mut loan = draft(dec!(10000));
        let before = loan.clone();

        let err = LoanLifecycle::disburse(&mut loan, ActorId::new(), t0()).unwrap_err();
        assert!(matches!(
            err,
            LoanError::InvalidLoanState {
                status: LoanStatus::Draft,
                action: LoanAction::Disburse,
                ..
            }
        ));
        assert!(LoanLifecycle::approve(&mut loan, ActorId::new(), t0()).is_err());
        assert!(
            LoanLifecycle::apply_repayment(&mut loan, kes(dec!(1)), OverpaymentPolicy::Clamp, t0())
                .is_err()
        );
        assert!(LoanLifecycle::mark_defaulted(&mut loan, t0()).is_err());
        assert_eq!(loan.status, before.status);
        assert_eq!(loan.outstanding_balance, before.outstanding_balance);
    }

    #[test]
    fn test_reject_requires_reason() {
        let mut loan = draft(dec!(10000));
        LoanLifecycle::submit(&mut loan, kes(dec!(100000)), t0()).unwrap();
        assert_eq!(
            LoanLifecycle::reject(&mut loan, ActorId::new(), "  ", t0()),
            Err(LoanError::RejectionReasonRequired)
        );
        LoanLifecycle::reject(&mut loan, ActorId::new(), "insufficient history", t0()).unwrap();
        assert_eq!(loan.status, LoanStatus::Rejected);
        assert_eq!(loan.rejection_reason.as_deref(), Some("insufficient history"));
        assert!(LoanLifecycle::approve(&mut loan, ActorId::new(), t0()).is_err());
    }

    #[test]
    fn test_penalty_accrues_per_full_month_once() {
        let mut loan = disbursed(dec!(10000));
        // due 2025-07-15, grace 10 days -> penalties from 2025-07-25
        let before_grace = Utc.with_ymd_and_hms(2025, 7, 20, 0, 0, 0).unwrap();
        assert!(!LoanLifecycle::is_overdue(&loan, before_grace));
        assert!(LoanLifecycle::accrue_penalty(&mut loan, before_grace).unwrap().is_zero());

        let one_month = Utc.with_ymd_and_hms(2025, 8, 26, 0, 0, 0).unwrap();
        assert!(LoanLifecycle::is_overdue(&loan, one_month));
        let charged = LoanLifecycle::accrue_penalty(&mut loan, one_month).unwrap();
        assert_eq!(charged.amount, dec!(232.00));
        assert_eq!(loan.outstanding_balance.amount, dec!(11832.00));

        // Same month again charges nothing.
        assert!(LoanLifecycle::accrue_penalty(&mut loan, one_month).unwrap().is_zero());

        let two_months = Utc.with_ymd_and_hms(2025, 9, 26, 0, 0, 0).unwrap();
        let charged = LoanLifecycle::accrue_penalty(&mut loan, two_months).unwrap();
        assert_eq!(charged.amount, dec!(236.64));
        assert_eq!(loan.penalty_accrued.amount, dec!(468.64));
        assert_eq!(loan.penalty_months_charged, 2);
    }

    #[test]
    fn test_penalty_overflow_is_an_error() {
        let mut loan = disbursed(dec!(10000));
        loan.outstanding_balance = kes(Decimal::MAX);
        loan.terms.penalty_rate = dec!(200);
        let one_month = Utc.with_ymd_and_hms(2025, 8, 26, 0, 0, 0).unwrap();

        let result = LoanLifecycle::accrue_penalty(&mut loan, one_month);
        assert!(matches!(result, Err(LoanError::Money(MoneyError::Overflow))));
        assert_eq!(loan.outstanding_balance.amount, Decimal::MAX);
        assert_eq!(loan.penalty_months_charged, 0);
    }

    #[test]
    fn test_days_overdue() {
        let loan = disbursed(dec!(10000));
        let as_of = Utc.with_ymd_and_hms(2025, 8, 4, 9, 0, 0).unwrap();
        assert_eq!(LoanLifecycle::days_overdue(&loan, as_of), 10);
        assert_eq!(LoanLifecycle::days_overdue(&loan, t0()), 0);
    }

    #[test]
    fn test_full_months_between() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(full_months_between(start, start), 0);
        assert_eq!(
            full_months_between(start, Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap()),
            1
        );
        assert_eq!(
            full_months_between(start, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            0
        );
    }
}
