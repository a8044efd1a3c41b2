//! Error types shared across the engine.
//!
//! Exchange failures are split into a retryable and a terminal family so the
//! retry wrapper can classify them without inspecting messages.

use crate::strategy::StrategyState;
use thiserror::Error;

/// Result type for exchange gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Failure returned by an exchange gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Structured business error from the exchange (bad request, insufficient
    /// funds, unknown order id). Never retried.
    #[error("exchange API error: {message} (reason: {reason})")]
    Api { reason: String, message: String },

    /// Connection reset, timeout, DNS failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Unexpected 5xx or rate-limit response without a structured body.
    #[error("exchange returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// Response body did not match the expected shape.
    #[error("malformed exchange response: {0}")]
    Decode(String),
}

/// How the retry wrapper treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retryable,
    Terminal,
}

impl GatewayError {
    pub fn api(reason: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Api {
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        GatewayError::Transport(message.into())
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            GatewayError::Transport(_) | GatewayError::Server { .. } => Disposition::Retryable,
            GatewayError::Api { .. } | GatewayError::Decode(_) => Disposition::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retryable
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Failure in the strategy store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("config serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Failure while driving a strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("invalid configuration for strategy {name}: missing {missing:?}")]
    InvalidConfig { name: String, missing: Vec<String> },

    #[error("config value {key}={value:?} is not a decimal")]
    BadConfigValue { key: String, value: String },

    #[error("missing config value {0}")]
    MissingConfigValue(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid state transition for {name}: {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: StrategyState,
        to: StrategyState,
    },

    #[error("strategy {0} is terminal; refusing to place orders")]
    Terminal(String),

    #[error("strategy not found: {0}")]
    NotFound(String),

    #[error("entry order {0} was rejected by the exchange")]
    EntryRejected(String),

    #[error("order {0} could not be cancelled and its exchange state is unknown")]
    OrderUnresolved(String),
}

impl StrategyError {
    /// Failures that abort the cycle but leave the strategy untouched, to be
    /// retried on its next cycle.
    pub fn defers_to_next_cycle(&self) -> bool {
        matches!(
            self,
            StrategyError::Store(_) | StrategyError::OrderUnresolved(_)
        )
    }
}
