//! Loan error types for calculation, lifecycle and credit-limit failures.

use rust_decimal::Decimal;
use thiserror::Error;

use kopa_shared::types::{LoanId, MoneyError};

use super::types::{LoanAction, LoanStatus};

/// Errors that can occur while pricing or transitioning a loan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoanError {
    /// Bad input shape or range.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Principal outside the product's bounds.
    #[error("Principal {principal} is outside the allowed range {min} - {max}")]
    PrincipalOutOfRange {
        /// Requested principal.
        principal: Decimal,
        /// Product minimum.
        min: Decimal,
        /// Product maximum.
        max: Decimal,
    },

    /// Transition not legal from the current status.
    #[error("Cannot {action} loan {loan_id} in status {status}")]
    InvalidLoanState {
        /// The loan.
        loan_id: LoanId,
        /// Its current status.
        status: LoanStatus,
        /// The attempted action.
        action: LoanAction,
    },

    /// Requested principal exceeds what the member may borrow.
    #[error("Requested {requested} exceeds available credit {available}")]
    CreditLimitExceeded {
        /// Requested principal.
        requested: Decimal,
        /// Available to borrow.
        available: Decimal,
    },

    /// Repayment above the outstanding balance under the reject policy.
    #[error("Repayment {amount} exceeds outstanding balance {outstanding}")]
    Overpayment {
        /// Repayment amount.
        amount: Decimal,
        /// Outstanding balance.
        outstanding: Decimal,
    },

    /// Rejection reason is required but not provided.
    #[error("Rejection reason is required")]
    RejectionReasonRequired,

    /// Money arithmetic failed (currency mismatch or overflow).
    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl LoanError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PrincipalOutOfRange { .. } => "PRINCIPAL_OUT_OF_RANGE",
            Self::InvalidLoanState { .. } => "INVALID_LOAN_STATE",
            Self::CreditLimitExceeded { .. } => "CREDIT_LIMIT_EXCEEDED",
            Self::Overpayment { .. } => "OVERPAYMENT",
            Self::RejectionReasonRequired => "REJECTION_REASON_REQUIRED",
            Self::Money(MoneyError::CurrencyMismatch { .. }) => "CURRENCY_MISMATCH",
            Self::Money(_) => "INVALID_AMOUNT",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::PrincipalOutOfRange { .. }
            | Self::Overpayment { .. }
            | Self::RejectionReasonRequired
            | Self::Money(_) => 400,
            Self::InvalidLoanState { .. } => 409,
            Self::CreditLimitExceeded { .. } => 422,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopa_shared::types::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_invalid_state_message() {
        let err = LoanError::InvalidLoanState {
            loan_id: LoanId::from_uuid(uuid::Uuid::nil()),
            status: LoanStatus::Pending,
            action: LoanAction::Disburse,
        };
        assert_eq!(err.error_code(), "INVALID_LOAN_STATE");
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(
            err.to_string(),
            "Cannot disburse loan 00000000-0000-0000-0000-000000000000 in status pending"
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            LoanError::CreditLimitExceeded {
                requested: dec!(30000),
                available: dec!(20000)
            }
            .http_status_code(),
            422
        );
        assert_eq!(
            LoanError::from(MoneyError::CurrencyMismatch {
                left: Currency::Kes,
                right: Currency::Usd
            })
            .error_code(),
            "CURRENCY_MISMATCH"
        );
        assert_eq!(LoanError::Validation("x".into()).http_status_code(), 400);
    }
}
