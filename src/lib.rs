//! # Gemini Trader
//!
//! Strategy execution and order reconciliation engine for the Gemini
//! exchange.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Gateway, store and strategy error types
//! - `exchange`: Gemini REST client, retry wrapper, mock and paper exchanges
//! - `strategy`: Scheduler, reconciler, policies and profit accounting
//! - `persistence`: SQLite storage for strategies and orders
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
