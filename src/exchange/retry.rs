//! Bounded exponential-backoff retry for gateway calls.
//!
//! [`with_retry`] wraps any async gateway call; [`RetryingGateway`] applies it
//! to every operation of an inner gateway. Only failures whose
//! [`Disposition`](crate::error::Disposition) is retryable are attempted again.

use super::traits::ExchangeGateway;
use super::types::{CancelledOrder, OrderReport, PlaceOrderRequest, PlacedOrder};
use crate::config::RetryConfig;
use crate::error::GatewayResult;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempt ceiling and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay after a failed `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Run `call` until it succeeds, fails terminally, or runs out of attempts.
///
/// `call` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> GatewayResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 1;

    loop {
        match call(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                error!(operation, attempt, error = %e, "Gateway call failed, not retryable");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                error!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Gateway call failed, retries exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Gateway call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Gateway decorator applying [`with_retry`] to every operation.
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: ExchangeGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Look for an order an earlier attempt may already have placed.
    async fn find_placed(&self, client_order_id: &str) -> GatewayResult<Option<PlacedOrder>> {
        let active = self.inner.get_active_orders().await?;
        Ok(active
            .into_iter()
            .find(|o| o.client_order_id.as_deref() == Some(client_order_id))
            .map(PlacedOrder::from))
    }
}

#[async_trait]
impl<G: ExchangeGateway> ExchangeGateway for RetryingGateway<G> {
    async fn place_order(&self, request: &PlaceOrderRequest) -> GatewayResult<PlacedOrder> {
        let mut request = request.clone();
        let client_order_id = request
            .client_order_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let request = &request;
        let client_order_id = client_order_id.as_str();

        with_retry(&self.policy, "place_order", |attempt| async move {
            // A timed-out attempt may still have reached the book
            if attempt > 1 {
                if let Some(existing) = self.find_placed(client_order_id).await? {
                    info!(
                        order_id = %existing.order_id,
                        client_order_id,
                        "Found order from earlier attempt, not placing again"
                    );
                    return Ok(existing);
                }
            }
            self.inner.place_order(request).await
        })
        .await
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelledOrder> {
        with_retry(&self.policy, "cancel_order", |_| self.inner.cancel_order(order_id)).await
    }

    async fn check_order_status(&self, order_id: &str) -> GatewayResult<OrderReport> {
        with_retry(&self.policy, "check_order_status", |_| {
            self.inner.check_order_status(order_id)
        })
        .await
    }

    async fn get_active_orders(&self) -> GatewayResult<Vec<OrderReport>> {
        with_retry(&self.policy, "get_active_orders", |_| self.inner.get_active_orders()).await
    }

    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        with_retry(&self.policy, "get_price", |_| self.inner.get_price(symbol)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::exchange::traits::MockExchangeGateway;
    use crate::exchange::types::ExchangeOrderType;
    use crate::strategy::{OrderSide, OrderStatus};
    use rust_decimal_macros::dec;

    fn instant_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    fn buy_request() -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "dogeusd".to_string(),
            amount: dec!(1000),
            price: dec!(0.35),
            side: OrderSide::Buy,
            order_type: ExchangeOrderType::ExchangeLimit,
            stop_price: None,
            client_order_id: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_error_attempted_max_retries_times() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_get_price()
            .times(3)
            .returning(|_| Err(GatewayError::transport("connection reset")));

        let gateway = RetryingGateway::new(mock, instant_policy());
        let err = gateway.get_price("dogeusd").await.unwrap_err();
        assert_eq!(err, GatewayError::transport("connection reset"));
    }

    #[tokio::test]
    async fn test_api_error_attempted_once() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_check_order_status()
            .times(1)
            .returning(|_| Err(GatewayError::api("OrderNotFound", "no such order")));

        let gateway = RetryingGateway::new(mock, instant_policy());
        let err = gateway.check_order_status("42").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let mut mock = MockExchangeGateway::new();
        let mut calls = 0;
        mock.expect_get_price().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(GatewayError::Server {
                    status: 502,
                    body: "bad gateway".to_string(),
                })
            } else {
                Ok(dec!(0.36))
            }
        });

        let gateway = RetryingGateway::new(mock, instant_policy());
        assert_eq!(gateway.get_price("dogeusd").await.unwrap(), dec!(0.36));
    }

    #[tokio::test]
    async fn test_place_retry_reuses_order_from_timed_out_attempt() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_place_order()
            .times(1)
            .returning(|_| Err(GatewayError::transport("timed out")));
        mock.expect_get_active_orders().times(1).returning(|| {
            Ok(vec![OrderReport {
                order_id: "555".to_string(),
                status: OrderStatus::Live,
                executed_amount: dec!(0),
                original_amount: dec!(1000),
                side: OrderSide::Buy,
                price: dec!(0.35),
                client_order_id: Some("fixed-id".to_string()),
            }])
        });

        let gateway = RetryingGateway::new(mock, instant_policy());
        let mut request = buy_request();
        request.client_order_id = Some("fixed-id".to_string());

        let placed = gateway.place_order(&request).await.unwrap();
        assert_eq!(placed.order_id, "555");
        assert_eq!(placed.amount, dec!(1000));
    }

    #[tokio::test]
    async fn test_place_assigns_client_order_id() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_place_order()
            .withf(|request| request.client_order_id.is_some())
            .times(1)
            .returning(|request| {
                Ok(PlacedOrder {
                    order_id: "1".to_string(),
                    status: OrderStatus::Live,
                    side: request.side,
                    price: request.price,
                    amount: request.amount,
                    stop_price: None,
                    client_order_id: request.client_order_id.clone(),
                })
            });

        let gateway = RetryingGateway::new(mock, instant_policy());
        let placed = gateway.place_order(&buy_request()).await.unwrap();
        assert!(placed.client_order_id.is_some());
    }
}
