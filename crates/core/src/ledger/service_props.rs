//! Property-based tests for TransactionLedger.
//!
//! - Property 1: Savings never go negative, drawdown never below the ceiling
//! - Property 2: Every account replays to its stored balance
//! - Property 3: A reference is applied at most once
//! - Property 4: Registration fee clearing is bounded by the deposit

use proptest::prelude::*;
use rust_decimal::Decimal;

use kopa_shared::types::{ActorId, Currency, MemberId, Money};

use super::config::LedgerConfig;
use super::service::{LedgerIntent, LedgerRequest, TransactionLedger};
use super::types::AccountKind;
use crate::credit::{CreditLimitConfig, CreditLimitPolicy};
use crate::events::EventPublisher;
use crate::member::NewMember;

/// Strategy to generate amounts (0.01 to 5,000.00).
fn amount() -> impl Strategy<Value = Decimal> {
    (1i64..500_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn account_kind() -> impl Strategy<Value = AccountKind> {
    prop_oneof![Just(AccountKind::Savings), Just(AccountKind::Drawdown)]
}

#[derive(Debug, Clone)]
enum Op {
    Deposit(Decimal),
    Withdraw(AccountKind, Decimal),
    Transfer(AccountKind, Decimal),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        amount().prop_map(Op::Deposit),
        (account_kind(), amount()).prop_map(|(k, a)| Op::Withdraw(k, a)),
        (account_kind(), amount()).prop_map(|(k, a)| Op::Transfer(k, a)),
    ]
}

fn kes(amount: Decimal) -> Money {
    Money::new(amount, Currency::Kes)
}

fn ledger(ceiling: Decimal) -> TransactionLedger {
    let config = LedgerConfig {
        drawdown_debt_ceiling: kes(ceiling),
        ..LedgerConfig::default()
    };
    TransactionLedger::new(
        config,
        CreditLimitPolicy::new(CreditLimitConfig::default()),
        EventPublisher::disabled(),
    )
}

fn enroll(ledger: &TransactionLedger) -> MemberId {
    ledger
        .enroll_member(
            NewMember {
                identity_ref: "ID-PROP".to_string(),
                full_name: "Prop Member".to_string(),
            },
            ActorId::new(),
        )
        .unwrap()
        .id
}

fn request(member_id: MemberId, intent: LedgerIntent, reference: Option<String>) -> LedgerRequest {
    LedgerRequest {
        member_id,
        intent,
        reference,
        external_reference: None,
        actor: ActorId::new(),
    }
}

fn intent(op: &Op) -> LedgerIntent {
    match *op {
        Op::Deposit(a) => LedgerIntent::Deposit { amount: kes(a) },
        Op::Withdraw(account, a) => LedgerIntent::Withdrawal {
            account,
            amount: kes(a),
        },
        Op::Transfer(from, a) => LedgerIntent::Transfer {
            from,
            to: match from {
                AccountKind::Savings => AccountKind::Drawdown,
                AccountKind::Drawdown => AccountKind::Savings,
            },
            amount: kes(a),
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property 1 and 2: any sequence of requests, accepted or refused,
    /// keeps balances within bounds and replayable.
    #[test]
    fn prop_balances_bounded_and_replayable(
        ops in prop::collection::vec(op(), 1..40),
        ceiling in (0i64..300_000i64).prop_map(|c| Decimal::new(c, 2)),
    ) {
        let ledger = ledger(ceiling);
        let member_id = enroll(&ledger);

        for op in &ops {
            let _ = ledger.record(request(member_id, intent(op), None));
            let accounts = ledger.accounts(member_id).unwrap();
            prop_assert!(!accounts[0].balance.is_negative(), "savings went negative after {:?}", op);
            // Enrollment debt may exceed a small ceiling.
            let floor = -ceiling.max(ledger.config().registration_fee.amount);
            prop_assert!(accounts[1].balance.amount >= floor);
        }

        for report in ledger.verify_all().unwrap() {
            prop_assert!(report.is_clean(), "replay discrepancy: {:?}", report.discrepancy);
        }
    }

    /// Property 3: repeating a reference never applies twice.
    #[test]
    fn prop_reference_applied_once(first in amount(), repeats in 1usize..5) {
        let ledger = ledger(Decimal::ZERO);
        let member_id = enroll(&ledger);
        let deposit = LedgerIntent::Deposit { amount: kes(first) };

        let receipt = ledger
            .record(request(member_id, deposit.clone(), Some("DEP-1".to_string())))
            .unwrap();
        let after_first = ledger.accounts(member_id).unwrap();

        for _ in 0..repeats {
            let err = ledger
                .record(request(member_id, deposit.clone(), Some("DEP-1".to_string())))
                .unwrap_err();
            prop_assert!(err.is_noop());
        }
        prop_assert_eq!(ledger.accounts(member_id).unwrap(), after_first);
        prop_assert_eq!(ledger.receipt_for_reference("DEP-1"), Some(receipt));
    }

    /// Property 4: the first deposit clears `min(deposit, fee)`.
    #[test]
    fn prop_registration_fee_clearing(deposit in amount()) {
        let ledger = ledger(Decimal::ZERO);
        let fee = ledger.config().registration_fee.amount;
        let member_id = enroll(&ledger);
        ledger
            .record(request(member_id, LedgerIntent::Deposit { amount: kes(deposit) }, None))
            .unwrap();

        let cleared = deposit.min(fee);
        let accounts = ledger.accounts(member_id).unwrap();
        prop_assert_eq!(accounts[0].balance.amount, deposit - cleared);
        prop_assert_eq!(accounts[1].balance.amount, cleared - fee);
    }
}
