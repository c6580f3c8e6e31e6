//! Money type with decimal precision and currency.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! This type wraps `rust_decimal::Decimal` and refuses to mix currencies.

use std::cmp::Ordering;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of decimal places money is settled at.
pub const CENT_SCALE: u32 = 2;

/// Errors raised by money arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Two amounts in different currencies were combined.
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: Currency,
        /// Currency of the right operand.
        right: Currency,
    },

    /// The result does not fit in a `Decimal`.
    #[error("Arithmetic overflow")]
    Overflow,

    /// The amount could not be parsed.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Represents a monetary amount with currency.
///
/// Uses `Decimal` internally to avoid floating-point precision errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// The amount in major units (e.g., shillings), fractional part is cents.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

/// ISO 4217 currency codes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Kenyan Shilling
    #[default]
    Kes,
    /// Ugandan Shilling
    Ugx,
    /// Tanzanian Shilling
    Tzs,
    /// Rwandan Franc
    Rwf,
    /// US Dollar
    Usd,
}

impl Money {
    /// Creates a new Money instance.
    #[must_use]
    pub const fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Creates a zero amount in the specified currency.
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Parses a decimal string such as `"1500.50"`.
    pub fn parse(amount: &str, currency: Currency) -> Result<Self, MoneyError> {
        amount
            .trim()
            .parse::<Decimal>()
            .map(|amount| Self::new(amount, currency))
            .map_err(|_| MoneyError::InvalidAmount(amount.to_string()))
    }

    /// Returns true if the amount is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is strictly below zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Returns true if the amount is strictly above zero.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Absolute value.
    #[must_use]
    pub fn abs(self) -> Self {
        Self::new(self.amount.abs(), self.currency)
    }

    /// Rounds to cents, half away from zero (half-up for positive amounts).
    #[must_use]
    pub fn round_cents(self) -> Self {
        Self::new(
            self.amount
                .round_dp_with_strategy(CENT_SCALE, RoundingStrategy::MidpointAwayFromZero),
            self.currency,
        )
    }

    /// Fails unless `other` is in the same currency.
    pub fn ensure_same_currency(&self, other: &Self) -> Result<(), MoneyError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            })
        }
    }

    /// Adds two amounts of the same currency.
    pub fn checked_add(self, other: Self) -> Result<Self, MoneyError> {
        self.ensure_same_currency(&other)?;
        self.amount
            .checked_add(other.amount)
            .map(|amount| Self::new(amount, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    /// Subtracts `other` from `self`, both in the same currency.
    pub fn checked_sub(self, other: Self) -> Result<Self, MoneyError> {
        self.ensure_same_currency(&other)?;
        self.amount
            .checked_sub(other.amount)
            .map(|amount| Self::new(amount, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    /// Compares two amounts of the same currency.
    pub fn try_cmp(&self, other: &Self) -> Result<Ordering, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    /// The smaller of two amounts of the same currency.
    pub fn try_min(self, other: Self) -> Result<Self, MoneyError> {
        Ok(match self.try_cmp(&other)? {
            Ordering::Greater => other,
            _ => self,
        })
    }

    /// Clamps a negative amount to zero.
    #[must_use]
    pub fn floor_zero(self) -> Self {
        if self.is_negative() {
            Self::zero(self.currency)
        } else {
            self
        }
    }
}

impl std::ops::Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.amount, self.currency)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.currency, self.amount)
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kes => write!(f, "KES"),
            Self::Ugx => write!(f, "UGX"),
            Self::Tzs => write!(f, "TZS"),
            Self::Rwf => write!(f, "RWF"),
            Self::Usd => write!(f, "USD"),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "KES" => Ok(Self::Kes),
            "UGX" => Ok(Self::Ugx),
            "TZS" => Ok(Self::Tzs),
            "RWF" => Ok(Self::Rwf),
            "USD" => Ok(Self::Usd),
            _ => Err(format!("Unknown currency: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn kes(amount: Decimal) -> Money {
        Money::new(amount, Currency::Kes)
    }

    #[test]
    fn test_money_zero() {
        let money = Money::zero(Currency::Ugx);
        assert!(money.is_zero());
        assert!(!money.is_negative());
        assert!(!money.is_positive());
        assert_eq!(money.currency, Currency::Ugx);
    }

    #[test]
    fn test_checked_add_and_sub() {
        assert_eq!(kes(dec!(10.50)).checked_add(kes(dec!(0.25))), Ok(kes(dec!(10.75))));
        assert_eq!(kes(dec!(10)).checked_sub(kes(dec!(12.5))), Ok(kes(dec!(-2.5))));
    }

    #[test]
    fn test_mixed_currency_rejected() {
        let usd = Money::new(dec!(1), Currency::Usd);
        assert_eq!(
            kes(dec!(1)).checked_add(usd),
            Err(MoneyError::CurrencyMismatch {
                left: Currency::Kes,
                right: Currency::Usd,
            })
        );
        assert!(kes(dec!(1)).try_cmp(&usd).is_err());
    }

    #[test]
    fn test_overflow_is_reported() {
        assert_eq!(
            kes(Decimal::MAX).checked_add(kes(dec!(1))),
            Err(MoneyError::Overflow)
        );
    }

    #[rstest]
    #[case(dec!(1.005), dec!(1.01))]
    #[case(dec!(1.004), dec!(1.00))]
    #[case(dec!(2.675), dec!(2.68))]
    #[case(dec!(-1.005), dec!(-1.01))]
    #[case(dec!(12682.41794562545318301696), dec!(12682.42))]
    fn test_round_cents_half_up(#[case] raw: Decimal, #[case] expected: Decimal) {
        assert_eq!(kes(raw).round_cents().amount, expected);
    }

    #[test]
    fn test_min_and_floor() {
        assert_eq!(kes(dec!(5)).try_min(kes(dec!(3))), Ok(kes(dec!(3))));
        assert_eq!(kes(dec!(-5)).floor_zero(), kes(dec!(0)));
        assert_eq!(kes(dec!(5)).floor_zero(), kes(dec!(5)));
        assert_eq!(-kes(dec!(5)), kes(dec!(-5)));
        assert_eq!(kes(dec!(-5)).abs(), kes(dec!(5)));
    }

    #[test]
    fn test_parse() {
        assert_eq!(Money::parse(" 1500.50 ", Currency::Kes), Ok(kes(dec!(1500.50))));
        assert!(matches!(
            Money::parse("12abc", Currency::Kes),
            Err(MoneyError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_currency_display_and_parse() {
        assert_eq!(Currency::Kes.to_string(), "KES");
        assert_eq!(Currency::Rwf.to_string(), "RWF");
        assert_eq!(Currency::from_str("ugx").unwrap(), Currency::Ugx);
        assert!(Currency::from_str("XXX").is_err());
        assert_eq!(kes(dec!(12.30)).to_string(), "KES 12.30");
    }

    #[test]
    fn test_serde_uses_string_amounts() {
        let json = serde_json::to_value(kes(dec!(10.25))).unwrap();
        assert_eq!(json["amount"], "10.25");
        assert_eq!(json["currency"], "KES");
    }
}
