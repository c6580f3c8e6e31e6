//! Typed ledger configuration.

use std::time::Duration;

use kopa_shared::types::{Currency, Money};
use kopa_shared::{LedgerSettings, OverpaymentPolicy};

/// Engine settings, converted from [`LedgerSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Currency of every account.
    pub currency: Currency,
    /// Fee charged to the drawdown account at enrollment.
    pub registration_fee: Money,
    /// Maximum wait for any lock.
    pub lock_timeout: Duration,
    /// How far below zero withdrawals may take a drawdown account.
    pub drawdown_debt_ceiling: Money,
    /// Handling of repayments above the outstanding balance.
    pub overpayment: OverpaymentPolicy,
    /// Days past the penalty start after which a loan is defaulted.
    pub default_after_days: u32,
}

impl LedgerConfig {
    /// Builds the config from application settings.
    #[must_use]
    pub fn from_settings(settings: &LedgerSettings) -> Self {
        let currency = settings.currency;
        Self {
            currency,
            registration_fee: Money::new(settings.registration_fee, currency).abs(),
            lock_timeout: Duration::from_millis(settings.lock_timeout_ms),
            drawdown_debt_ceiling: Money::new(settings.drawdown_debt_ceiling, currency).abs(),
            overpayment: settings.overpayment,
            default_after_days: settings.default_after_days,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::from_settings(&LedgerSettings::default())
    }
}
