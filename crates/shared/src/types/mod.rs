//! Common types used across the application.

pub mod id;
pub mod money;
pub mod pagination;

pub use id::*;
pub use money::{CENT_SCALE, Currency, Money, MoneyError};
pub use pagination::{PageMeta, PageRequest, PageResponse};
