//! Exchange integrations for strategy execution.
//!
//! ## Gemini
//! Signed REST client for:
//! - Order placement and cancellation
//! - Order status and active order listing
//! - Public ticker prices
//!
//! ## Mock / Paper
//! In-process order book for tests and paper trading.
//!
//! Every gateway is used through [`RetryingGateway`] in production.

mod client;
pub mod mock;
pub mod retry;
mod traits;
mod types;

pub use client::GeminiClient;
pub use mock::{GatewayOp, MockExchange, PaperExchange};
pub use retry::{with_retry, RetryPolicy, RetryingGateway};
pub use traits::ExchangeGateway;
#[cfg(test)]
pub use traits::MockExchangeGateway;
pub use types::*;
