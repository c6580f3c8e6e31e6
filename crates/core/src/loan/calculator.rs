//! Loan pricing for the three interest models.
//!
//! All intermediate values keep full `Decimal` precision; rounding to cents
//! (half-up) happens once, on the final figures.

use rust_decimal::Decimal;

use kopa_shared::types::{CENT_SCALE, Money, MoneyError};

use super::error::LoanError;
use super::types::{InterestModel, LoanQuote, LoanTerms};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Stateless loan calculator.
pub struct LoanCalculator;

impl LoanCalculator {
    /// Computes interest, fee, total and installment for `principal` under `terms`.
    ///
    /// `total` is principal plus interest; the fee is reported separately.
    ///
    /// # Errors
    ///
    /// - `Validation` if the principal is not positive, has sub-cent precision,
    ///   or the duration is zero
    /// - `Money(Overflow)` if an intermediate value does not fit in a `Decimal`
    pub fn compute(principal: Money, terms: &LoanTerms) -> Result<LoanQuote, LoanError> {
        if !principal.is_positive() {
            return Err(LoanError::Validation("principal must be positive".into()));
        }
        if principal.amount.normalize().scale() > CENT_SCALE {
            return Err(LoanError::Validation(
                "principal cannot have fractions of a cent".into(),
            ));
        }
        if terms.duration_months == 0 {
            return Err(LoanError::Validation(
                "duration must be at least one month".into(),
            ));
        }
        if terms.interest_rate < Decimal::ZERO || terms.charge_fee_percentage < Decimal::ZERO {
            return Err(LoanError::Validation("rates cannot be negative".into()));
        }

        let p = principal.amount;
        let r = div(terms.interest_rate, HUNDRED)?;
        let n = Decimal::from(terms.duration_months);

        let raw_total = match terms.interest_model {
            InterestModel::Flat => add(p, mul(mul(p, r)?, n)?)?,
            InterestModel::ReducingBalance => {
                if r.is_zero() {
                    p
                } else {
                    mul(Self::annuity_payment(p, r, terms.duration_months)?, n)?
                }
            }
            InterestModel::Compound => mul(p, pow(Decimal::ONE + r, terms.duration_months)?)?,
        };
        let raw_fee = div(mul(p, terms.charge_fee_percentage)?, HUNDRED)?;
        let raw_installment = div(raw_total, n)?;

        let currency = principal.currency;
        let total = Money::new(raw_total, currency).round_cents();
        let interest = total.checked_sub(principal)?;

        Ok(LoanQuote {
            principal,
            interest,
            fee: Money::new(raw_fee, currency).round_cents(),
            total,
            installment: Money::new(raw_installment, currency).round_cents(),
        })
    }

    /// Equal monthly installment: `p * r * (1+r)^n / ((1+r)^n - 1)`.
    ///
    /// `r` must be non-zero.
    fn annuity_payment(p: Decimal, r: Decimal, n: u32) -> Result<Decimal, LoanError> {
        let factor = pow(Decimal::ONE + r, n)?;
        let denominator = factor - Decimal::ONE;
        if denominator.is_zero() {
            return Err(LoanError::Validation("interest rate is too small".into()));
        }
        div(mul(mul(p, r)?, factor)?, denominator)
    }
}

/// `base^exp` by repeated multiplication, with overflow checks.
fn pow(base: Decimal, exp: u32) -> Result<Decimal, LoanError> {
    let mut acc = Decimal::ONE;
    for _ in 0..exp {
        acc = mul(acc, base)?;
    }
    Ok(acc)
}

fn mul(a: Decimal, b: Decimal) -> Result<Decimal, LoanError> {
    a.checked_mul(b).ok_or(LoanError::Money(MoneyError::Overflow))
}

fn div(a: Decimal, b: Decimal) -> Result<Decimal, LoanError> {
    a.checked_div(b).ok_or(LoanError::Money(MoneyError::Overflow))
}

fn add(a: Decimal, b: Decimal) -> Result<Decimal, LoanError> {
    a.checked_add(b).ok_or(LoanError::Money(MoneyError::Overflow))
}
