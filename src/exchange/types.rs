//! Gateway contract types and Gemini wire formats.

use crate::strategy::{OrderKind, OrderSide, OrderStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order type as understood by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeOrderType {
    #[serde(rename = "exchange limit")]
    ExchangeLimit,
    #[serde(rename = "exchange stop limit")]
    ExchangeStopLimit,
}

impl ExchangeOrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeOrderType::ExchangeLimit => "exchange limit",
            ExchangeOrderType::ExchangeStopLimit => "exchange stop limit",
        }
    }
}

impl From<OrderKind> for ExchangeOrderType {
    fn from(kind: OrderKind) -> Self {
        if kind.is_stop() {
            ExchangeOrderType::ExchangeStopLimit
        } else {
            ExchangeOrderType::ExchangeLimit
        }
    }
}

/// New order request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub side: OrderSide,
    pub order_type: ExchangeOrderType,
    pub stop_price: Option<Decimal>,
    /// Idempotency key; assigned by the retry wrapper when absent
    pub client_order_id: Option<String>,
}

/// Exchange acknowledgement of a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub status: OrderStatus,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub stop_price: Option<Decimal>,
    pub client_order_id: Option<String>,
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelledOrder {
    pub order_id: String,
    pub cancelled: bool,
}

/// Authoritative order state reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub order_id: String,
    pub status: OrderStatus,
    pub executed_amount: Decimal,
    pub original_amount: Decimal,
    pub side: OrderSide,
    pub price: Decimal,
    pub client_order_id: Option<String>,
}

impl From<OrderReport> for PlacedOrder {
    fn from(report: OrderReport) -> Self {
        Self {
            order_id: report.order_id,
            status: report.status,
            side: report.side,
            price: report.price,
            amount: report.original_amount,
            stop_price: None,
            client_order_id: report.client_order_id,
        }
    }
}

// ==================== Gemini Wire Types ====================

/// Order object returned by Gemini's order endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub original_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl GeminiOrder {
    /// Map Gemini's order flags onto the canonical status vocabulary.
    pub fn status(&self) -> OrderStatus {
        if self.is_cancelled {
            OrderStatus::Cancelled
        } else if self.original_amount > Decimal::ZERO
            && self.executed_amount >= self.original_amount
        {
            OrderStatus::Filled
        } else if self.executed_amount > Decimal::ZERO {
            OrderStatus::PartialFill
        } else if self.is_live {
            OrderStatus::Live
        } else {
            OrderStatus::Accepted
        }
    }

    pub fn into_report(self) -> OrderReport {
        OrderReport {
            status: self.status(),
            order_id: self.order_id,
            executed_amount: self.executed_amount,
            original_amount: self.original_amount,
            side: self.side,
            price: self.price,
            client_order_id: self.client_order_id,
        }
    }

    pub fn into_placed(self) -> PlacedOrder {
        PlacedOrder {
            status: self.status(),
            order_id: self.order_id,
            side: self.side,
            price: self.price,
            amount: self.original_amount,
            stop_price: self.stop_price,
            client_order_id: self.client_order_id,
        }
    }
}

/// Structured error body.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiErrorBody {
    pub result: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Public ticker.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiTicker {
    #[serde(with = "rust_decimal::serde::str")]
    pub last: Decimal,
}
