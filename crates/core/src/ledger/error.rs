//! Ledger error types.
//!
//! This module defines every failure a ledger operation can report:
//! validation errors, funds and state errors, lookup errors, concurrency
//! errors and idempotency replays. Loan-level failures are carried through
//! unchanged.

use rust_decimal::Decimal;
use thiserror::Error;

use kopa_shared::types::{
    Currency, LedgerAccountId, LoanId, LoanTypeId, MemberId, MoneyError, TransactionId,
};

use super::types::AccountKind;
use crate::loan::LoanError;
use crate::member::MemberStatus;

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Bad input shape or range.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Amount in a different currency than the ledger.
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// Ledger currency.
        expected: Currency,
        /// Currency supplied.
        actual: Currency,
    },

    // ========== Funds & State Errors ==========
    /// Debit exceeds what the account may give.
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// The account.
        account_id: LedgerAccountId,
        /// Balance at the time of the request.
        balance: Decimal,
        /// Amount requested.
        requested: Decimal,
    },

    /// Member may not perform this operation in its current status.
    #[error("Member {member_id} is {status}")]
    MemberNotActive {
        /// The member.
        member_id: MemberId,
        /// Its current status.
        status: MemberStatus,
    },

    /// Loan-level failure (invalid state, credit limit, overpayment, ...).
    #[error(transparent)]
    Loan(#[from] LoanError),

    // ========== Lookup Errors ==========
    /// Member not found.
    #[error("Member not found: {0}")]
    MemberNotFound(MemberId),

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(LedgerAccountId),

    /// Member has no account of the requested kind.
    #[error("Member {member_id} has no {kind} account")]
    AccountNotProvisioned {
        /// The member.
        member_id: MemberId,
        /// The missing account kind.
        kind: AccountKind,
    },

    /// Loan not found.
    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    /// Loan type not found.
    #[error("Loan type not found: {0}")]
    LoanTypeNotFound(LoanTypeId),

    /// No pending payment carries this external reference.
    #[error("Unknown payment reference: {0}")]
    UnknownReference(String),

    // ========== Concurrency & Idempotency ==========
    /// A lock could not be acquired in time.
    #[error("Timed out waiting for lock on {resource}, please retry")]
    LockTimeout {
        /// What was being locked.
        resource: String,
    },

    /// The reference was already used; the request is a replay.
    #[error("Duplicate transaction reference: {reference}")]
    DuplicateTransaction {
        /// The repeated reference.
        reference: String,
        /// The record the first request produced, once known.
        original: Option<TransactionId>,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MoneyError> for LedgerError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyMismatch { left, right } => Self::CurrencyMismatch {
                expected: left,
                actual: right,
            },
            MoneyError::InvalidAmount(msg) => Self::Validation(format!("invalid amount: {msg}")),
            MoneyError::Overflow => Self::Internal("arithmetic overflow".to_string()),
        }
    }
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::MemberNotActive { .. } => "MEMBER_NOT_ACTIVE",
            Self::Loan(err) => err.error_code(),
            Self::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            Self::AccountNotFound(_) | Self::AccountNotProvisioned { .. } => "ACCOUNT_NOT_FOUND",
            Self::LoanNotFound(_) => "LOAN_NOT_FOUND",
            Self::LoanTypeNotFound(_) => "LOAN_TYPE_NOT_FOUND",
            Self::UnknownReference(_) => "UNKNOWN_REFERENCE",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::DuplicateTransaction { .. } => "DUPLICATE_TRANSACTION",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::Validation(_) | Self::CurrencyMismatch { .. } => 400,

            // 404 Not Found
            Self::MemberNotFound(_)
            | Self::AccountNotFound(_)
            | Self::AccountNotProvisioned { .. }
            | Self::LoanNotFound(_)
            | Self::LoanTypeNotFound(_)
            | Self::UnknownReference(_) => 404,

            // 409 Conflict - replays
            Self::DuplicateTransaction { .. } => 409,

            // 422 Unprocessable - business rules
            Self::InsufficientFunds { .. } | Self::MemberNotActive { .. } => 422,

            Self::Loan(err) => err.http_status_code(),

            // 503 Service Unavailable - contention, retry later
            Self::LockTimeout { .. } => 503,

            // 500 Internal Server Error
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Returns true if the error reports a replay that should be treated as success.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::DuplicateTransaction { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::{LoanAction, LoanStatus};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::Validation("x".into()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            LedgerError::InsufficientFunds {
                account_id: LedgerAccountId::from_uuid(Uuid::nil()),
                balance: dec!(10),
                requested: dec!(20),
            }
            .error_code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(
            LedgerError::LockTimeout {
                resource: "account".into()
            }
            .error_code(),
            "LOCK_TIMEOUT"
        );
    }

    #[test]
    fn test_loan_errors_pass_through() {
        let err = LedgerError::from(LoanError::InvalidLoanState {
            loan_id: LoanId::from_uuid(Uuid::nil()),
            status: LoanStatus::Pending,
            action: LoanAction::Disburse,
        });
        assert_eq!(err.error_code(), "INVALID_LOAN_STATE");
        assert_eq!(err.http_status_code(), 409);
        assert!(err.to_string().starts_with("Cannot disburse loan"));
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(LedgerError::Validation("x".into()).http_status_code(), 400);
        assert_eq!(
            LedgerError::MemberNotFound(MemberId::from_uuid(Uuid::nil())).http_status_code(),
            404
        );
        assert_eq!(
            LedgerError::LockTimeout {
                resource: "loan".into()
            }
            .http_status_code(),
            503
        );
        assert_eq!(LedgerError::Internal("x".into()).http_status_code(), 500);
    }

    #[test]
    fn test_retryable_and_noop() {
        let timeout = LedgerError::LockTimeout {
            resource: "account".into(),
        };
        let duplicate = LedgerError::DuplicateTransaction {
            reference: "MP-1".into(),
            original: None,
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_noop());
        assert!(duplicate.is_noop());
        assert!(!duplicate.is_retryable());
        assert!(!LedgerError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_money_error_mapping() {
        let err = LedgerError::from(MoneyError::CurrencyMismatch {
            left: Currency::Kes,
            right: Currency::Usd,
        });
        assert_eq!(
            err,
            LedgerError::CurrencyMismatch {
                expected: Currency::Kes,
                actual: Currency::Usd
            }
        );
        assert_eq!(
            LedgerError::from(MoneyError::Overflow).error_code(),
            "INTERNAL_ERROR"
        );
    }
}
