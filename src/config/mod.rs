//! Configuration management for the strategy trader.
//!
//! Loads settings from environment variables and config files.

use crate::strategy::StrategyDescriptor;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://api.gemini.com";
const GEMINI_SANDBOX_URL: &str = "https://api.sandbox.gemini.com";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gemini API credentials
    #[serde(default)]
    pub gemini: GeminiConfig,
    /// Monitor loop cadence
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Gateway retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Profit bookkeeping
    #[serde(default)]
    pub profit: ProfitConfig,
    /// Strategy store location
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Strategies submitted on startup
    #[serde(default)]
    pub strategies: Vec<StrategyDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret for signing requests
    #[serde(default)]
    pub api_secret: String,
    /// Use the sandbox instead of production
    #[serde(default)]
    pub sandbox: bool,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Pause after a tick-level failure
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per gateway call (including the first)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the second attempt; doubles each attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitConfig {
    /// Share of each profitable trade set aside for tax (0.0-1.0)
    #[serde(default = "default_tax_reserve_rate")]
    pub tax_reserve_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path
    #[serde(default = "default_database_path")]
    pub path: String,
}

// Default value functions
fn default_request_timeout() -> u64 {
    30
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_tax_reserve_rate() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

fn default_database_path() -> String {
    "data/strategies.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("GT"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Conventional credential variables take precedence when present
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.gemini.api_key = key;
        }
        if let Ok(secret) = std::env::var("GEMINI_API_SECRET") {
            config.gemini.api_secret = secret;
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.scheduler.tick_interval_ms > 0,
            "tick_interval_ms must be positive"
        );

        anyhow::ensure!(self.retry.max_retries >= 1, "max_retries must be at least 1");

        anyhow::ensure!(
            self.retry.base_delay_ms <= self.retry.max_delay_ms,
            "base_delay_ms must not exceed max_delay_ms"
        );

        anyhow::ensure!(
            self.profit.tax_reserve_rate >= Decimal::ZERO
                && self.profit.tax_reserve_rate <= Decimal::ONE,
            "tax_reserve_rate must be between 0 and 1"
        );

        for descriptor in &self.strategies {
            anyhow::ensure!(
                !descriptor.name.trim().is_empty(),
                "strategy names must not be empty"
            );
            anyhow::ensure!(
                !descriptor.symbol.trim().is_empty(),
                "strategy {} has no symbol",
                descriptor.name
            );
        }

        Ok(())
    }
}

impl GeminiConfig {
    pub fn base_url(&self) -> &'static str {
        if self.sandbox {
            GEMINI_SANDBOX_URL
        } else {
            GEMINI_BASE_URL
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            profit: ProfitConfig::default(),
            database: DatabaseConfig::default(),
            strategies: Vec::new(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            sandbox: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ProfitConfig {
    fn default() -> Self {
        Self {
            tax_reserve_rate: default_tax_reserve_rate(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{StrategyKind, StrategyState};
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.profit.tax_reserve_rate, dec!(0.5));
    }

    #[test]
    fn test_invalid_tax_rate_rejected() {
        let mut config = Config::default();
        config.profit.tax_reserve_rate = dec!(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategies_from_toml() {
        let raw = r#"
            [[strategies]]
            name = "DOGE Breakout $0.40"
            type = "breakout"
            symbol = "dogeusd"
            check_interval = 60

            [strategies.config]
            breakout_price = "0.40000"
            amount = "2500"
            take_profit_1 = "0.41000"
            take_profit_2 = "0.42500"
            stop_loss = "0.38200"
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.strategies.len(), 1);
        let descriptor = &config.strategies[0];
        assert_eq!(descriptor.kind, StrategyKind::Breakout);
        assert_eq!(descriptor.state, StrategyState::Active);
        assert_eq!(descriptor.config["breakout_price"], "0.40000");
        assert!(config.validate().is_ok());
    }
}
