//! Core business logic for Kopa.
//!
//! This crate contains the loan lifecycle and dual-ledger accounting engine
//! with ZERO web or database dependencies. State lives in memory behind
//! per-entity locks; every money movement is journaled.
//!
//! # Modules
//!
//! - `member` - Members and their status
//! - `loan` - Loan products, repayment math and the loan state machine
//! - `credit` - Savings-based credit limits
//! - `ledger` - Accounts, journal and the `TransactionLedger` engine
//! - `gateway` - Pending external payments and their reconciliation
//! - `events` - Domain events for downstream collaborators

pub mod credit;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod loan;
pub mod member;

pub use events::{DomainEvent, EventPublisher};
pub use ledger::{LedgerError, TransactionLedger};
