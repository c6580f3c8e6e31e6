//! Ledger domain types: account kinds, transaction classification and records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use kopa_shared::types::{ActorId, LedgerAccountId, LoanId, MemberId, Money, TransactionId};

/// The two kinds of member ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Member savings; never negative.
    Savings,
    /// Debt-facing account; starts negative by the registration fee and
    /// receives loan disbursements.
    Drawdown,
}

impl AccountKind {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Savings => "savings",
            Self::Drawdown => "drawdown",
        }
    }

    /// Parses a kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "savings" => Some(Self::Savings),
            "drawdown" => Some(Self::Drawdown),
            _ => None,
        }
    }

    /// Prefix used for account numbers.
    #[must_use]
    pub fn number_prefix(&self) -> &'static str {
        match self {
            Self::Savings => "SAV",
            Self::Drawdown => "DRW",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a balance change from the member account's point of view.
///
/// - Credit increases the balance
/// - Debit decreases the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    /// Balance decreases.
    Debit,
    /// Balance increases.
    Credit,
}

/// Transaction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money paid into savings.
    Deposit,
    /// Money paid out of an account.
    Withdrawal,
    /// One leg of a same-member transfer.
    Transfer,
    /// Loan principal credited to the member.
    LoanDisbursement,
    /// Money applied to a loan's outstanding balance.
    LoanRepayment,
    /// Registration fee charge or clearing.
    RegistrationFee,
}

impl TransactionType {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Transfer => "transfer",
            Self::LoanDisbursement => "loan_disbursement",
            Self::LoanRepayment => "loan_repayment",
            Self::RegistrationFee => "registration_fee",
        }
    }

    /// Parses a type from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            "transfer" => Some(Self::Transfer),
            "loan_disbursement" => Some(Self::LoanDisbursement),
            "loan_repayment" | "repayment" => Some(Self::LoanRepayment),
            "registration_fee" => Some(Self::RegistrationFee),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record status.
///
/// `Pending` records (external payments awaiting confirmation) carry no
/// balance effect. `Confirmed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Awaiting external confirmation.
    Pending,
    /// Applied to the account balance (immutable).
    Confirmed,
    /// Rejected by the external party (immutable, no balance effect).
    Failed,
}

impl TransactionStatus {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// Returns true if the record can no longer change.
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Balance before and after a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    /// Balance before the mutation.
    pub before: Money,
    /// Balance after the mutation.
    pub after: Money,
}

/// Immutable audit entry for one balance-affecting event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Record ID.
    pub id: TransactionId,
    /// Global confirmation order; `None` until confirmed.
    pub sequence: Option<u64>,
    /// Owning member.
    pub member_id: MemberId,
    /// Account the record applies to.
    pub account_id: LedgerAccountId,
    /// Kind of that account.
    pub account_kind: AccountKind,
    /// Classification.
    pub transaction_type: TransactionType,
    /// Whether the balance went up or down.
    pub direction: EntryDirection,
    /// Unsigned amount.
    pub amount: Money,
    /// Balance before the record was applied.
    pub balance_before: Money,
    /// Balance after the record was applied.
    pub balance_after: Money,
    /// Loan this record concerns.
    pub loan_id: Option<LoanId>,
    /// Request reference; shared by every record a single request produced.
    pub reference: String,
    /// External reference (e.g., mobile-money receipt code).
    pub external_reference: Option<String>,
    /// Status.
    pub status: TransactionStatus,
    /// Who initiated the movement.
    pub actor: ActorId,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the record was confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Amount with the sign of its effect on the balance.
    #[must_use]
    pub fn signed_amount(&self) -> Money {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }

    /// Checks `balance_after == balance_before ± amount` for confirmed records,
    /// and no balance effect for the others.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.status {
            TransactionStatus::Confirmed => self
                .balance_before
                .checked_add(self.signed_amount())
                .is_ok_and(|expected| expected == self.balance_after),
            TransactionStatus::Pending | TransactionStatus::Failed => {
                self.balance_before == self.balance_after
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopa_shared::types::Currency;
    use rust_decimal_macros::dec;

    fn record(direction: EntryDirection, before: &str, amount: &str, after: &str) -> TransactionRecord {
        let kes = |v: &str| Money::parse(v, Currency::Kes).unwrap();
        TransactionRecord {
            id: TransactionId::new(),
            sequence: Some(1),
            member_id: MemberId::new(),
            account_id: LedgerAccountId::new(),
            account_kind: AccountKind::Savings,
            transaction_type: TransactionType::Deposit,
            direction,
            amount: kes(amount),
            balance_before: kes(before),
            balance_after: kes(after),
            loan_id: None,
            reference: "ref-1".to_string(),
            external_reference: None,
            status: TransactionStatus::Confirmed,
            actor: ActorId::new(),
            created_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_signed_amount() {
        let credit = record(EntryDirection::Credit, "0", "10", "10");
        let debit = record(EntryDirection::Debit, "10", "4", "6");
        assert_eq!(credit.signed_amount().amount, dec!(10));
        assert_eq!(debit.signed_amount().amount, dec!(-4));
    }

    #[test]
    fn test_consistency() {
        assert!(record(EntryDirection::Credit, "5", "10", "15").is_consistent());
        assert!(record(EntryDirection::Debit, "5", "10", "-5").is_consistent());
        assert!(!record(EntryDirection::Debit, "5", "10", "15").is_consistent());

        let mut pending = record(EntryDirection::Credit, "5", "10", "5");
        pending.status = TransactionStatus::Pending;
        assert!(pending.is_consistent());
    }

    #[test]
    fn test_type_parse_accepts_short_repayment() {
        assert_eq!(
            TransactionType::parse("repayment"),
            Some(TransactionType::LoanRepayment)
        );
        assert_eq!(
            TransactionType::parse("REGISTRATION_FEE"),
            Some(TransactionType::RegistrationFee)
        );
        assert_eq!(TransactionType::parse("refund"), None);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_value(TransactionType::LoanDisbursement).unwrap(),
            "loan_disbursement"
        );
        assert_eq!(serde_json::to_value(AccountKind::Drawdown).unwrap(), "drawdown");
        assert_eq!(
            serde_json::to_value(TransactionStatus::Confirmed).unwrap(),
            "confirmed"
        );
    }
}
