//! Venue-agnostic gateway trait.
//!
//! Everything the engine needs from an exchange:
//! - Order placement and cancellation
//! - Authoritative order status
//! - Active order listing
//! - Last traded price

use super::types::{CancelledOrder, OrderReport, PlaceOrderRequest, PlacedOrder};
use crate::error::GatewayResult;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Operations the engine performs against an exchange.
///
/// Implementations return [`GatewayError`](crate::error::GatewayError) so the
/// retry wrapper can tell transport failures from business rejections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Submit a new order.
    async fn place_order(&self, request: &PlaceOrderRequest) -> GatewayResult<PlacedOrder>;

    /// Cancel an order by exchange id.
    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelledOrder>;

    /// Fetch the exchange's view of an order.
    async fn check_order_status(&self, order_id: &str) -> GatewayResult<OrderReport>;

    /// List all orders still open on the exchange.
    async fn get_active_orders(&self) -> GatewayResult<Vec<OrderReport>>;

    /// Last traded price for a symbol.
    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal>;
}

#[async_trait]
impl<T: ExchangeGateway + ?Sized> ExchangeGateway for Arc<T> {
    async fn place_order(&self, request: &PlaceOrderRequest) -> GatewayResult<PlacedOrder> {
        (**self).place_order(request).await
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelledOrder> {
        (**self).cancel_order(order_id).await
    }

    async fn check_order_status(&self, order_id: &str) -> GatewayResult<OrderReport> {
        (**self).check_order_status(order_id).await
    }

    async fn get_active_orders(&self) -> GatewayResult<Vec<OrderReport>> {
        (**self).get_active_orders().await
    }

    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        (**self).get_price(symbol).await
    }
}
