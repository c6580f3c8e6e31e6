//! Application configuration management.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::Currency;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// JWT configuration.
    #[serde(default)]
    pub jwt: JwtSettings,
    /// Ledger engine settings.
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Credit-limit policy settings.
    #[serde(default)]
    pub credit: CreditSettings,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// JWT configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key used to verify tokens issued by the identity service.
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
    /// Access token expiration in seconds.
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: u64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            access_token_expiry_secs: default_access_token_expiry(),
        }
    }
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_access_token_expiry() -> u64 {
    900 // 15 minutes
}

/// What happens when a repayment exceeds the outstanding balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentPolicy {
    /// Refuse the whole repayment.
    Reject,
    /// Apply (and debit) only the outstanding amount.
    #[default]
    Clamp,
}

/// Which call sites apply the credit-limit floor/ceiling clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampScope {
    /// Only member self-service applications are clamped.
    #[default]
    SelfService,
    /// Every limit computation is clamped.
    Always,
    /// The raw multiplier rule is used everywhere.
    Never,
}

/// Ledger engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    /// Operating currency of every account.
    #[serde(default)]
    pub currency: Currency,
    /// Registration fee charged to the drawdown account on enrollment.
    #[serde(default = "default_registration_fee")]
    pub registration_fee: Decimal,
    /// How long a ledger operation waits for an account or loan lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// How far below zero a drawdown withdrawal may take the balance.
    #[serde(default)]
    pub drawdown_debt_ceiling: Decimal,
    /// Handling of repayments above the outstanding balance.
    #[serde(default)]
    pub overpayment: OverpaymentPolicy,
    /// Days past due (after grace) before a loan is marked defaulted.
    #[serde(default = "default_default_after_days")]
    pub default_after_days: u32,
    /// Attempts made for operations failing with a lock timeout.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Backoff step between retries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            currency: Currency::default(),
            registration_fee: default_registration_fee(),
            lock_timeout_ms: default_lock_timeout_ms(),
            drawdown_debt_ceiling: Decimal::ZERO,
            overpayment: OverpaymentPolicy::default(),
            default_after_days: default_default_after_days(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_registration_fee() -> Decimal {
    Decimal::new(500, 0)
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_default_after_days() -> u32 {
    90
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

/// Credit-limit policy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditSettings {
    /// Savings multiplier for the raw limit.
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    /// Lower clamp bound.
    #[serde(default = "default_floor")]
    pub self_service_floor: Decimal,
    /// Upper clamp bound.
    #[serde(default = "default_ceiling")]
    pub self_service_ceiling: Decimal,
    /// Where the clamp applies.
    #[serde(default)]
    pub clamp_scope: ClampScope,
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            self_service_floor: default_floor(),
            self_service_ceiling: default_ceiling(),
            clamp_scope: ClampScope::default(),
        }
    }
}

fn default_multiplier() -> Decimal {
    Decimal::new(4, 0)
}

fn default_floor() -> Decimal {
    Decimal::new(5_000, 0)
}

fn default_ceiling() -> Decimal {
    Decimal::new(50_000, 0)
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("KOPA").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_load_without_sources_uses_defaults() {
        temp_env::with_vars_unset(["KOPA__SERVER__PORT", "KOPA__LEDGER__CURRENCY"], || {
            let config = AppConfig::load().unwrap();
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.ledger.currency, Currency::Kes);
            assert_eq!(config.ledger.registration_fee, dec!(500));
            assert_eq!(config.ledger.overpayment, OverpaymentPolicy::Clamp);
            assert_eq!(config.credit.multiplier, dec!(4));
            assert_eq!(config.credit.clamp_scope, ClampScope::SelfService);
        });
    }

    #[test]
    fn test_environment_overrides() {
        temp_env::with_vars(
            [
                ("KOPA__SERVER__PORT", Some("9090")),
                ("KOPA__LEDGER__CURRENCY", Some("UGX")),
                ("KOPA__LEDGER__OVERPAYMENT", Some("reject")),
                ("KOPA__CREDIT__CLAMP_SCOPE", Some("always")),
            ],
            || {
                let config = AppConfig::load().unwrap();
                assert_eq!(config.server.port, 9090);
                assert_eq!(config.ledger.currency, Currency::Ugx);
                assert_eq!(config.ledger.overpayment, OverpaymentPolicy::Reject);
                assert_eq!(config.credit.clamp_scope, ClampScope::Always);
            },
        );
    }
}
