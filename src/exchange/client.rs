//! Gemini REST API client.

use crate::config::GeminiConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::*;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use sha2::Sha384;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

/// Gemini API client.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    last_nonce: AtomicU64,
}

impl GeminiClient {
    /// Create a new Gemini client from configuration.
    pub fn new(config: &GeminiConfig) -> anyhow::Result<Self> {
        Self::with_base_url(config, config.base_url())
    }

    /// Create a client against a custom base URL.
    pub fn with_base_url(config: &GeminiConfig, base_url: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            last_nonce: AtomicU64::new(0),
        })
    }

    /// Strictly increasing millisecond nonce.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = self
            .last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    /// Base64-encode the payload and sign it with HMAC-SHA384.
    fn sign(&self, payload: &Value) -> GatewayResult<(String, String)> {
        let encoded = STANDARD.encode(payload.to_string());
        let mut mac = Hmac::<Sha384>::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| GatewayError::api("InvalidSecret", e.to_string()))?;
        mac.update(encoded.as_bytes());
        Ok((encoded, hex::encode(mac.finalize().into_bytes())))
    }

    /// POST a signed request to a private endpoint.
    async fn private_request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Map<String, Value>,
    ) -> GatewayResult<T> {
        let mut payload = Map::new();
        payload.insert("request".to_string(), json!(endpoint));
        payload.insert("nonce".to_string(), json!(self.next_nonce().to_string()));
        payload.extend(params);
        let payload = Value::Object(payload);

        let (encoded, signature) = self.sign(&payload)?;
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "text/plain")
            .header("Content-Length", "0")
            .header("Cache-Control", "no-cache")
            .header("X-GEMINI-APIKEY", &self.api_key)
            .header("X-GEMINI-PAYLOAD", encoded)
            .header("X-GEMINI-SIGNATURE", signature)
            .send()
            .await?;

        decode_response(response).await
    }

    fn order_id_param(order_id: &str) -> Value {
        match order_id.parse::<u64>() {
            Ok(numeric) => json!(numeric),
            Err(_) => json!(order_id),
        }
    }
}

/// Turn a response into `T` or a classified gateway error.
async fn decode_response<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if let Ok(error) = serde_json::from_str::<GeminiErrorBody>(&body) {
        if error.result == "error" {
            return Err(GatewayError::Api {
                reason: error.reason,
                message: error.message,
            });
        }
    }

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Server {
            status: status.as_u16(),
            body,
        });
    }

    if !status.is_success() {
        return Err(GatewayError::api(status.to_string(), body));
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
}

#[async_trait]
impl ExchangeGateway for GeminiClient {
    #[instrument(skip(self), fields(symbol = %request.symbol, side = %request.side))]
    async fn place_order(&self, request: &PlaceOrderRequest) -> GatewayResult<PlacedOrder> {
        let mut params = Map::new();
        params.insert("symbol".to_string(), json!(request.symbol));
        params.insert("amount".to_string(), json!(request.amount.to_string()));
        params.insert("price".to_string(), json!(request.price.to_string()));
        params.insert("side".to_string(), json!(request.side.as_str()));
        params.insert("type".to_string(), json!(request.order_type.as_str()));
        if let Some(stop_price) = request.stop_price {
            params.insert("stop_price".to_string(), json!(stop_price.to_string()));
        }
        if let Some(client_order_id) = &request.client_order_id {
            params.insert("client_order_id".to_string(), json!(client_order_id));
        }

        let order: GeminiOrder = self.private_request("/v1/order/new", params).await?;
        debug!(order_id = %order.order_id, "Order accepted by Gemini");
        Ok(order.into_placed())
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelledOrder> {
        let mut params = Map::new();
        params.insert("order_id".to_string(), Self::order_id_param(order_id));

        let order: GeminiOrder = self.private_request("/v1/order/cancel", params).await?;
        Ok(CancelledOrder {
            order_id: order.order_id,
            cancelled: order.is_cancelled,
        })
    }

    #[instrument(skip(self))]
    async fn check_order_status(&self, order_id: &str) -> GatewayResult<OrderReport> {
        let mut params = Map::new();
        params.insert("order_id".to_string(), Self::order_id_param(order_id));

        let order: GeminiOrder = self.private_request("/v1/order/status", params).await?;
        Ok(order.into_report())
    }

    #[instrument(skip(self))]
    async fn get_active_orders(&self) -> GatewayResult<Vec<OrderReport>> {
        let orders: Vec<GeminiOrder> = self.private_request("/v1/orders", Map::new()).await?;
        Ok(orders.into_iter().map(GeminiOrder::into_report).collect())
    }

    #[instrument(skip(self))]
    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        let url = format!(
            "{}/v1/pubticker/{}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let response = self.http.get(&url).send().await?;
        let ticker: GeminiTicker = decode_response(response).await?;
        Ok(ticker.last)
    }
}
