//! Property-based tests for LoanCalculator.
//!
//! - Totals are principal plus interest, settled to cents
//! - Compound interest is never below flat interest, reducing balance never above it
//! - The fee depends only on principal and fee percentage

use proptest::prelude::*;
use rust_decimal::Decimal;

use kopa_shared::types::{Currency, LoanTypeId, Money};

use super::calculator::LoanCalculator;
use super::types::{InterestModel, LoanTerms};

/// Principal between 1.00 and 1,000,000.00.
fn principal() -> impl Strategy<Value = Decimal> {
    (100i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Monthly rate between 0.00% and 10.00%.
fn rate() -> impl Strategy<Value = Decimal> {
    (0i64..=1_000i64).prop_map(|v| Decimal::new(v, 2))
}

fn terms(model: InterestModel, rate: Decimal, months: u32, fee: Decimal) -> LoanTerms {
    LoanTerms {
        loan_type_id: LoanTypeId::new(),
        interest_rate: rate,
        interest_model: model,
        charge_fee_percentage: fee,
        min_amount: Money::new(Decimal::ONE, Currency::Kes),
        max_amount: Money::new(Decimal::new(1_000_000, 0), Currency::Kes),
        duration_months: months,
        grace_period_days: 0,
        penalty_rate: Decimal::ZERO,
    }
}

fn model() -> impl Strategy<Value = InterestModel> {
    prop_oneof![
        Just(InterestModel::Flat),
        Just(InterestModel::ReducingBalance),
        Just(InterestModel::Compound),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_total_is_principal_plus_interest(
        p in principal(),
        r in rate(),
        n in 1u32..=36,
        m in model(),
    ) {
        let principal = Money::new(p, Currency::Kes);
        let quote = LoanCalculator::compute(principal, &terms(m, r, n, Decimal::ZERO)).unwrap();

        prop_assert_eq!(quote.total.amount, p + quote.interest.amount);
        prop_assert!(quote.interest.amount >= Decimal::ZERO);
        prop_assert!(quote.total.amount.scale() <= 2);
        prop_assert!(quote.interest.amount.scale() <= 2);
    }

    #[test]
    fn prop_models_are_ordered(
        p in principal(),
        r in rate(),
        n in 1u32..=36,
    ) {
        let principal = Money::new(p, Currency::Kes);
        let flat = LoanCalculator::compute(principal, &terms(InterestModel::Flat, r, n, Decimal::ZERO)).unwrap();
        let reducing = LoanCalculator::compute(principal, &terms(InterestModel::ReducingBalance, r, n, Decimal::ZERO)).unwrap();
        let compound = LoanCalculator::compute(principal, &terms(InterestModel::Compound, r, n, Decimal::ZERO)).unwrap();

        prop_assert!(compound.interest.amount >= flat.interest.amount);
        prop_assert!(reducing.interest.amount <= flat.interest.amount);
    }

    #[test]
    fn prop_fee_is_independent_of_model(
        p in principal(),
        r in rate(),
        n in 1u32..=36,
        fee in (0i64..=500i64).prop_map(|v| Decimal::new(v, 2)),
        m in model(),
    ) {
        let principal = Money::new(p, Currency::Kes);
        let quote = LoanCalculator::compute(principal, &terms(m, r, n, fee)).unwrap();
        let flat = LoanCalculator::compute(principal, &terms(InterestModel::Flat, Decimal::ZERO, 1, fee)).unwrap();
        prop_assert_eq!(quote.fee, flat.fee);
    }
}
