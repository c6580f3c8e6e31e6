//! End-to-end loan lifecycle tests against the in-memory engine.
//!
//! Covers credit limits, disbursement, repayment, penalties, overdue
//! sweeps and audit replay through the public `TransactionLedger` API.

use chrono::{Duration, Months};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use kopa_core::credit::{CreditChannel, CreditLimitConfig, CreditLimitPolicy};
use kopa_core::events::{DomainEvent, EventPublisher};
use kopa_core::ledger::{
    AccountKind, LedgerConfig, LedgerError, LedgerIntent, LedgerRequest, LoanApplication,
    TransactionLedger,
};
use kopa_core::loan::{InterestModel, LoanError, LoanLifecycle, LoanStatus, NewLoanType};
use kopa_core::member::NewMember;
use kopa_shared::ClampScope;
use kopa_shared::types::{ActorId, Currency, LoanTypeId, MemberId, Money};

fn kes(amount: Decimal) -> Money {
    Money::new(amount, Currency::Kes)
}

fn engine(clamp_scope: ClampScope) -> (
    TransactionLedger,
    tokio::sync::mpsc::UnboundedReceiver<DomainEvent>,
) {
    let (events, receiver) = EventPublisher::channel();
    let credit = CreditLimitPolicy::new(CreditLimitConfig {
        clamp_scope,
        ..CreditLimitConfig::default()
    });
    (
        TransactionLedger::new(LedgerConfig::default(), credit, events),
        receiver,
    )
}

/// Enrolls a member and deposits enough to leave `savings` after the fee.
fn member_with_savings(ledger: &TransactionLedger, identity: &str, savings: Decimal) -> MemberId {
    let member = ledger
        .enroll_member(
            NewMember {
                identity_ref: identity.to_string(),
                full_name: "Test Member".to_string(),
            },
            ActorId::new(),
        )
        .unwrap();
    let fee = ledger.config().registration_fee.amount;
    deposit(ledger, member.id, savings + fee);
    member.id
}

fn deposit(ledger: &TransactionLedger, member_id: MemberId, amount: Decimal) {
    ledger
        .record(LedgerRequest {
            member_id,
            intent: LedgerIntent::Deposit {
                amount: kes(amount),
            },
            reference: None,
            external_reference: None,
            actor: ActorId::new(),
        })
        .unwrap();
}

fn product(
    ledger: &TransactionLedger,
    rate: Decimal,
    model: InterestModel,
    penalty_rate: Decimal,
) -> LoanTypeId {
    ledger
        .register_loan_type(NewLoanType {
            name: format!("{model} {rate}%"),
            interest_rate: rate,
            interest_model: model,
            charge_fee_percentage: dec!(0),
            min_amount: dec!(1000),
            max_amount: dec!(100000),
            duration_months: 1,
            grace_period_days: 5,
            penalty_rate,
        })
        .unwrap()
        .id
}

fn apply(
    ledger: &TransactionLedger,
    member_id: MemberId,
    loan_type_id: LoanTypeId,
    principal: Decimal,
    channel: CreditChannel,
) -> Result<kopa_core::loan::Loan, LedgerError> {
    ledger.apply_for_loan(LoanApplication {
        member_id,
        loan_type_id,
        principal: kes(principal),
        channel,
        actor: ActorId::new(),
    })
}

#[test]
fn test_credit_limit_accounts_for_outstanding_loans() {
    let (ledger, _events) = engine(ClampScope::SelfService);
    let member_id = member_with_savings(&ledger, "ID-1", dec!(5000));
    let loan_type = product(&ledger, dec!(0), InterestModel::Flat, dec!(0));

    let limit = ledger
        .loan_limit(member_id, CreditChannel::SelfService)
        .unwrap();
    assert_eq!(limit.limit.amount, dec!(20000));
    assert_eq!(limit.available_to_borrow.amount, dec!(20000));

    let actor = ActorId::new();
    let loan = apply(&ledger, member_id, loan_type, dec!(15000), CreditChannel::SelfService).unwrap();
    ledger.approve_loan(loan.id, actor).unwrap();
    ledger.disburse_loan(loan.id, actor).unwrap();

    let limit = ledger
        .loan_limit(member_id, CreditChannel::SelfService)
        .unwrap();
    assert_eq!(limit.outstanding.amount, dec!(15000));
    assert_eq!(limit.available_to_borrow.amount, dec!(5000));

    let err = apply(&ledger, member_id, loan_type, dec!(6000), CreditChannel::SelfService)
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Loan(LoanError::CreditLimitExceeded { .. })
    ));
    assert_eq!(err.http_status_code(), 422);
}

#[test]
fn test_self_service_limit_is_clamped() {
    let (ledger, _events) = engine(ClampScope::SelfService);
    let member_id = member_with_savings(&ledger, "ID-1", dec!(20000));

    let self_service = ledger
        .loan_limit(member_id, CreditChannel::SelfService)
        .unwrap();
    let staff = ledger.loan_limit(member_id, CreditChannel::Staff).unwrap();
    assert_eq!(self_service.limit.amount, dec!(50000));
    assert_eq!(staff.limit.amount, dec!(80000));
}

#[test]
fn test_disbursed_loan_accrues_interest_into_outstanding() {
    let (ledger, mut events) = engine(ClampScope::Never);
    let member_id = member_with_savings(&ledger, "ID-1", dec!(5000));
    let loan_type = product(&ledger, dec!(2.5), InterestModel::Flat, dec!(0));
    let actor = ActorId::new();

    let loan = apply(&ledger, member_id, loan_type, dec!(10000), CreditChannel::Staff).unwrap();
    assert_eq!(loan.interest.amount, dec!(250.00));
    assert_eq!(loan.total_payable.amount, dec!(10250.00));
    assert!(loan.outstanding_balance.is_zero());

    ledger.approve_loan(loan.id, actor).unwrap();
    let loan = ledger.disburse_loan(loan.id, actor).unwrap();
    assert_eq!(loan.outstanding_balance.amount, dec!(10250.00));
    assert!(matches!(
        events.try_recv().unwrap(),
        DomainEvent::LoanDisbursed { .. }
    ));

    let accounts = ledger.accounts(member_id).unwrap();
    assert_eq!(accounts[1].kind, AccountKind::Drawdown);
    assert_eq!(accounts[1].balance.amount, dec!(10000));

    // Disbursing twice is refused and moves no money.
    assert!(ledger.disburse_loan(loan.id, actor).is_err());
    assert_eq!(ledger.accounts(member_id).unwrap(), accounts);
}

#[test]
fn test_repayments_until_completion() {
    let (ledger, mut events) = engine(ClampScope::Never);
    let member_id = member_with_savings(&ledger, "ID-1", dec!(5000));
    let loan_type = product(&ledger, dec!(0), InterestModel::Flat, dec!(0));
    let actor = ActorId::new();
    let loan = apply(&ledger, member_id, loan_type, dec!(4000), CreditChannel::Staff).unwrap();
    ledger.approve_loan(loan.id, actor).unwrap();
    ledger.disburse_loan(loan.id, actor).unwrap();
    while events.try_recv().is_ok() {}

    let repay = |amount: Decimal, source: AccountKind| {
        ledger.record(LedgerRequest {
            member_id,
            intent: LedgerIntent::Repayment {
                loan_id: loan.id,
                source,
                amount: kes(amount),
            },
            reference: None,
            external_reference: None,
            actor,
        })
    };

    repay(dec!(1500), AccountKind::Savings).unwrap();
    assert_eq!(ledger.loan(loan.id).unwrap().outstanding_balance.amount, dec!(2500));

    // The clamped repayment only takes the 2500 owed.
    let receipt = repay(dec!(9000), AccountKind::Drawdown).unwrap();
    assert_eq!(receipt.record.amount.amount, dec!(2500));

    let loan = ledger.loan(loan.id).unwrap();
    assert_eq!(loan.status, LoanStatus::Completed);
    assert_eq!(loan.amount_repaid.amount, dec!(4000));
    assert!(matches!(
        events.try_recv().unwrap(),
        DomainEvent::LoanCompleted { .. }
    ));

    let accounts = ledger.accounts(member_id).unwrap();
    assert_eq!(accounts[0].balance.amount, dec!(3500));
    assert_eq!(accounts[1].balance.amount, dec!(1500));
    assert!(ledger.verify_all().unwrap().iter().all(|r| r.is_clean()));

    assert!(matches!(
        repay(dec!(1), AccountKind::Savings),
        Err(LedgerError::Loan(LoanError::InvalidLoanState { .. }))
    ));
}

#[test]
fn test_penalties_and_overdue_sweep() {
    let (ledger, mut events) = engine(ClampScope::Never);
    let member_id = member_with_savings(&ledger, "ID-1", dec!(5000));
    let loan_type = product(&ledger, dec!(0), InterestModel::Flat, dec!(2));
    let actor = ActorId::new();
    let loan = apply(&ledger, member_id, loan_type, dec!(10000), CreditChannel::Staff).unwrap();
    ledger.approve_loan(loan.id, actor).unwrap();
    let loan = ledger.disburse_loan(loan.id, actor).unwrap();
    while events.try_recv().is_ok() {}

    let start = LoanLifecycle::penalty_start(&loan).unwrap();
    assert!(ledger.accrue_penalties(start).unwrap().is_empty());

    let two_months_in = start
        .checked_add_months(Months::new(2))
        .unwrap()
        + Duration::hours(1);
    let charges = ledger.accrue_penalties(two_months_in).unwrap();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount.amount, dec!(404.00));
    assert_eq!(charges[0].outstanding.amount, dec!(10404.00));
    // Re-running for the same date charges nothing.
    assert!(ledger.accrue_penalties(two_months_in).unwrap().is_empty());

    let report = ledger.sweep_overdue(start + Duration::days(10)).unwrap();
    assert_eq!(report.overdue, vec![loan.id]);
    assert!(report.defaulted.is_empty());
    assert!(matches!(
        events.try_recv().unwrap(),
        DomainEvent::LoanOverdue { days_overdue: 10, .. }
    ));

    let report = ledger.sweep_overdue(start + Duration::days(91)).unwrap();
    assert_eq!(report.defaulted, vec![loan.id]);
    assert_eq!(ledger.loan(loan.id).unwrap().status, LoanStatus::Defaulted);

    // Penalties do not touch account balances.
    assert!(ledger.verify_all().unwrap().iter().all(|r| r.is_clean()));
}

#[test]
fn test_principal_outside_product_range() {
    let (ledger, _events) = engine(ClampScope::Never);
    let member_id = member_with_savings(&ledger, "ID-1", dec!(50000));
    let loan_type = product(&ledger, dec!(1), InterestModel::ReducingBalance, dec!(0));
    let err = apply(&ledger, member_id, loan_type, dec!(999.99), CreditChannel::Staff).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Loan(LoanError::PrincipalOutOfRange { .. })
    ));
    assert!(ledger.member_loans(member_id).unwrap().is_empty());
}
