//! Credit-limit policy: how much a member may borrow.

pub mod policy;

pub use policy::{CreditChannel, CreditLimitConfig, CreditLimitPolicy, LoanLimit};
