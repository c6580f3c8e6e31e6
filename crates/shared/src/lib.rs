//! Shared types, errors, and configuration for Kopa.
//!
//! This crate provides common types used across all other crates:
//! - Money types with decimal precision
//! - Typed IDs for type-safe entity references
//! - Pagination types for list endpoints
//! - Application-wide error types
//! - Configuration management
//! - Bearer-token claims identifying the acting user

pub mod auth;
pub mod config;
pub mod error;
pub mod jwt;
pub mod types;

pub use auth::Claims;
pub use config::{
    AppConfig, ClampScope, CreditSettings, JwtSettings, LedgerSettings, OverpaymentPolicy,
};
pub use error::AppError;
pub use jwt::{JwtError, JwtService};
