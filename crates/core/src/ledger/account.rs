//! Member ledger accounts.
//!
//! Balance mutations are `pub(crate)`: outside this crate a balance can only
//! change through the ledger engine, which writes the matching record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kopa_shared::types::{Currency, LedgerAccountId, MemberId, Money};

use super::error::LedgerError;
use super::types::{AccountKind, BalanceChange};

/// A single-currency balance owned by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAccount {
    /// Account ID.
    pub id: LedgerAccountId,
    /// Owning member.
    pub member_id: MemberId,
    /// Unique account number.
    pub account_number: String,
    /// Savings or drawdown.
    pub kind: AccountKind,
    /// Current balance.
    pub balance: Money,
    /// When the account was provisioned.
    pub opened_at: DateTime<Utc>,
}

impl LedgerAccount {
    /// Opens an account with a zero balance.
    #[must_use]
    pub fn open(
        member_id: MemberId,
        account_number: String,
        kind: AccountKind,
        currency: Currency,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LedgerAccountId::new(),
            member_id,
            account_number,
            kind,
            balance: Money::zero(currency),
            opened_at,
        }
    }

    fn check_amount(&self, amount: Money) -> Result<(), LedgerError> {
        self.balance.ensure_same_currency(&amount)?;
        if !amount.is_positive() {
            return Err(LedgerError::Validation("amount must be positive".into()));
        }
        Ok(())
    }

    /// Decreases the balance.
    ///
    /// Savings accounts refuse to go below zero. Drawdown accounts never
    /// fail on sign; debt limits are the caller's policy.
    pub(crate) fn debit(&mut self, amount: Money) -> Result<BalanceChange, LedgerError> {
        self.check_amount(amount)?;
        let after = self.balance.checked_sub(amount)?;
        if self.kind == AccountKind::Savings && after.is_negative() {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.id,
                balance: self.balance.amount,
                requested: amount.amount,
            });
        }
        let before = std::mem::replace(&mut self.balance, after);
        Ok(BalanceChange { before, after })
    }

    /// Increases the balance.
    pub(crate) fn credit(&mut self, amount: Money) -> Result<BalanceChange, LedgerError> {
        self.check_amount(amount)?;
        let after = self.balance.checked_add(amount)?;
        let before = std::mem::replace(&mut self.balance, after);
        Ok(BalanceChange { before, after })
    }
}
