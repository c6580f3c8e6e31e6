//! Loan products, pricing and the loan state machine.
//!
//! - `types` - products, snapshotted terms, the loan aggregate
//! - `calculator` - flat, reducing-balance and compound pricing
//! - `lifecycle` - status transitions and their balance effects on the loan
//! - `error` - loan error types

pub mod calculator;
pub mod error;
pub mod lifecycle;
pub mod types;

#[cfg(test)]
mod calculator_props;

pub use calculator::LoanCalculator;
pub use error::LoanError;
pub use lifecycle::{LoanLifecycle, RepaymentOutcome};
pub use types::{
    InterestModel, Loan, LoanAction, LoanQuote, LoanStatus, LoanTerms, LoanType, NewLoanType,
};
