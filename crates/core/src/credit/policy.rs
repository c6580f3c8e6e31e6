//! Credit-limit policy.
//!
//! One policy, one clamp rule. Whether the floor/ceiling clamp applies is a
//! named setting ([`ClampScope`]) evaluated against the calling channel.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kopa_shared::types::{Money, MoneyError};
use kopa_shared::{ClampScope, CreditSettings};

use crate::loan::LoanError;
use crate::member::MemberStatus;

/// Who is asking for the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditChannel {
    /// The member applying on their own behalf.
    #[default]
    SelfService,
    /// A staff member acting for the member.
    Staff,
}

/// Typed credit-limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditLimitConfig {
    /// Savings multiplier.
    pub multiplier: Decimal,
    /// Clamp lower bound.
    pub floor: Decimal,
    /// Clamp upper bound.
    pub ceiling: Decimal,
    /// Channels the clamp applies to.
    pub clamp_scope: ClampScope,
}

impl CreditLimitConfig {
    /// Builds the config from application settings.
    #[must_use]
    pub fn from_settings(settings: &CreditSettings) -> Self {
        Self {
            multiplier: settings.multiplier,
            floor: settings.self_service_floor,
            ceiling: settings.self_service_ceiling,
            clamp_scope: settings.clamp_scope,
        }
    }
}

impl Default for CreditLimitConfig {
    fn default() -> Self {
        Self::from_settings(&CreditSettings::default())
    }
}

/// Borrowing capacity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanLimit {
    /// Current savings balance.
    pub savings_balance: Money,
    /// Limit before obligations.
    pub limit: Money,
    /// Exposure of the member's open loans.
    pub outstanding: Money,
    /// `limit - outstanding`, floored at zero.
    pub available_to_borrow: Money,
}

/// Computes what a member may borrow.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditLimitPolicy {
    config: CreditLimitConfig,
}

impl CreditLimitPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(config: CreditLimitConfig) -> Self {
        Self { config }
    }

    /// Returns the policy configuration.
    #[must_use]
    pub fn config(&self) -> &CreditLimitConfig {
        &self.config
    }

    fn clamps(&self, channel: CreditChannel) -> bool {
        match self.config.clamp_scope {
            ClampScope::Always => true,
            ClampScope::Never => false,
            ClampScope::SelfService => channel == CreditChannel::SelfService,
        }
    }

    /// Limit before obligations: zero unless the member is active, otherwise
    /// `savings * multiplier`, clamped to `[floor, ceiling]` when the channel
    /// is in scope.
    pub fn limit(
        &self,
        status: MemberStatus,
        savings_balance: Money,
        channel: CreditChannel,
    ) -> Result<Money, LoanError> {
        let currency = savings_balance.currency;
        if status != MemberStatus::Active {
            return Ok(Money::zero(currency));
        }
        let raw = savings_balance
            .amount
            .max(Decimal::ZERO)
            .checked_mul(self.config.multiplier)
            .ok_or(LoanError::Money(MoneyError::Overflow))?;
        let limit = if self.clamps(channel) {
            raw.clamp(self.config.floor, self.config.ceiling.max(self.config.floor))
        } else {
            raw
        };
        Ok(Money::new(limit, currency).round_cents())
    }

    /// Full limit snapshot given the member's current exposure.
    pub fn evaluate(
        &self,
        status: MemberStatus,
        savings_balance: Money,
        outstanding: Money,
        channel: CreditChannel,
    ) -> Result<LoanLimit, LoanError> {
        let limit = self.limit(status, savings_balance, channel)?;
        let available_to_borrow = limit.checked_sub(outstanding)?.floor_zero();
        Ok(LoanLimit {
            savings_balance,
            limit,
            outstanding,
            available_to_borrow,
        })
    }

    /// Fails with `CreditLimitExceeded` if `requested` is above what is available.
    pub fn check(limit: &LoanLimit, requested: Money) -> Result<(), LoanError> {
        if requested.try_cmp(&limit.available_to_borrow)?.is_gt() {
            return Err(LoanError::CreditLimitExceeded {
                requested: requested.amount,
                available: limit.available_to_borrow.amount,
            });
        }
        Ok(())
    }
}
