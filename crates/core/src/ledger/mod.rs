//! Dual-ledger accounting.
//!
//! This module implements the money side of the engine:
//! - Savings and drawdown accounts per member
//! - The append-only transaction journal and reference idempotency
//! - Bounded, ordered lock acquisition
//! - The `TransactionLedger` engine applying deposits, withdrawals,
//!   transfers, repayments and disbursements atomically
//! - Audit replay of account balances
//! - Retry of contention failures

pub mod account;
pub mod config;
pub mod error;
pub mod journal;
pub(crate) mod locks;
pub mod replay;
pub mod retry;
pub mod service;
pub mod types;

#[cfg(test)]
mod service_props;

pub use account::LedgerAccount;
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use journal::{Journal, ReferenceGuard};
pub(crate) use locks::LockedAccounts;
pub use replay::{ReplayDiscrepancy, ReplayReport, replay_account};
pub use retry::RetryPolicy;
pub(crate) use service::RecordContext;
pub use service::{
    LedgerIntent, LedgerRequest, LoanApplication, PenaltyCharge, Receipt, SweepReport,
    TransactionLedger,
};
pub use types::{
    AccountKind, BalanceChange, EntryDirection, TransactionRecord, TransactionStatus,
    TransactionType,
};
