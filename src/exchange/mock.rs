//! In-process exchange for paper trading and tests.

use super::traits::ExchangeGateway;
use super::types::*;
use crate::error::{GatewayError, GatewayResult};
use crate::strategy::{OrderSide, OrderStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Gateway operation, used to script failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    PlaceOrder,
    CancelOrder,
    CheckOrderStatus,
    GetActiveOrders,
    GetPrice,
}

#[derive(Debug, Clone)]
struct MockOrder {
    report: OrderReport,
    symbol: String,
    /// Trigger for stop-limit orders
    stop_price: Option<Decimal>,
}

impl MockOrder {
    /// Whether the last price reaches this order's limit, or its trigger
    /// for stop-limit orders.
    fn crosses(&self, price: Decimal) -> bool {
        match (self.stop_price, self.report.side) {
            (Some(stop), OrderSide::Sell) => price <= stop,
            (Some(stop), OrderSide::Buy) => price >= stop,
            (None, OrderSide::Buy) => price <= self.report.price,
            (None, OrderSide::Sell) => price >= self.report.price,
        }
    }

    fn is_open(&self) -> bool {
        !self.report.status.is_terminal()
    }

    fn fill(&mut self) {
        self.report.executed_amount = self.report.original_amount;
        self.report.status = OrderStatus::Filled;
    }
}

#[derive(Debug, Default)]
struct MockExchangeState {
    orders: HashMap<String, MockOrder>,
    prices: HashMap<String, Decimal>,
    scripted_failures: HashMap<GatewayOp, VecDeque<GatewayError>>,
    persistent_failures: HashMap<GatewayOp, GatewayError>,
    calls: HashMap<GatewayOp, u32>,
    placed: Vec<PlaceOrderRequest>,
}

impl MockExchangeState {
    /// Count the call and return any failure scripted for it.
    fn enter(&mut self, op: GatewayOp) -> GatewayResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;

        if let Some(err) = self
            .scripted_failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if let Some(err) = self.persistent_failures.get(&op) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn fill_crossing(&mut self, symbol: &str, price: Decimal) {
        for (order_id, order) in self.orders.iter_mut() {
            if order.symbol == symbol && order.is_open() && order.crosses(price) {
                order.fill();
                info!(%order_id, %symbol, %price, "Paper order filled");
            }
        }
    }
}

/// Scriptable in-memory exchange.
///
/// Orders rest as LIVE until a test fills or cancels them. With auto-fill
/// enabled, resting orders fill as soon as the last price reaches their limit.
pub struct MockExchange {
    state: RwLock<MockExchangeState>,
    order_id_counter: AtomicU64,
    auto_fill: bool,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockExchangeState::default()),
            order_id_counter: AtomicU64::new(1),
            auto_fill: false,
        }
    }

    /// Exchange that fills resting orders when the price crosses them.
    pub fn with_auto_fill() -> Self {
        Self {
            auto_fill: true,
            ..Self::new()
        }
    }

    fn next_order_id(&self) -> String {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Set the last traded price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        state.prices.insert(symbol.to_string(), price);
        if self.auto_fill {
            state.fill_crossing(symbol, price);
        }
    }

    /// Fill an order completely. Returns false for unknown or closed orders.
    pub async fn fill_order(&self, order_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.orders.get_mut(order_id) {
            Some(order) if order.is_open() => {
                order.fill();
                debug!(%order_id, "Mock order filled");
                true
            }
            _ => false,
        }
    }

    /// Record a partial execution.
    pub async fn partial_fill(&self, order_id: &str, executed_amount: Decimal) -> bool {
        let mut state = self.state.write().await;
        match state.orders.get_mut(order_id) {
            Some(order) if order.is_open() => {
                order.report.executed_amount = executed_amount;
                order.report.status = OrderStatus::PartialFill;
                true
            }
            _ => false,
        }
    }

    /// Force an order's reported status, regardless of ordering rules.
    pub async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> bool {
        let mut state = self.state.write().await;
        match state.orders.get_mut(order_id) {
            Some(order) => {
                order.report.status = status;
                true
            }
            None => false,
        }
    }

    /// Fail the next call of `op` with `err`. Queued failures are consumed in order.
    pub async fn fail_next(&self, op: GatewayOp, err: GatewayError) {
        self.state
            .write()
            .await
            .scripted_failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Fail every call of `op` until [`clear_failures`](Self::clear_failures).
    pub async fn fail_always(&self, op: GatewayOp, err: GatewayError) {
        self.state.write().await.persistent_failures.insert(op, err);
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.scripted_failures.clear();
        state.persistent_failures.clear();
    }

    /// Number of calls made to `op`, including failed ones.
    pub async fn calls(&self, op: GatewayOp) -> u32 {
        self.state.read().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Every accepted placement request, oldest first.
    pub async fn placed_orders(&self) -> Vec<PlaceOrderRequest> {
        self.state.read().await.placed.clone()
    }

    /// Current exchange view of an order.
    pub async fn order(&self, order_id: &str) -> Option<OrderReport> {
        self.state
            .read()
            .await
            .orders
            .get(order_id)
            .map(|o| o.report.clone())
    }
}

fn not_found(order_id: &str) -> GatewayError {
    GatewayError::api("OrderNotFound", format!("order {order_id} not found"))
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn place_order(&self, request: &PlaceOrderRequest) -> GatewayResult<PlacedOrder> {
        let mut state = self.state.write().await;
        state.enter(GatewayOp::PlaceOrder)?;

        if request.amount <= Decimal::ZERO {
            return Err(GatewayError::api("InvalidQuantity", "amount must be positive"));
        }
        if request.price <= Decimal::ZERO {
            return Err(GatewayError::api("InvalidPrice", "price must be positive"));
        }
        let stop_price = match request.order_type {
            ExchangeOrderType::ExchangeLimit => None,
            ExchangeOrderType::ExchangeStopLimit => Some(request.stop_price.ok_or_else(|| {
                GatewayError::api("InvalidStopPrice", "stop limit order needs a stop price")
            })?),
        };

        let order_id = self.next_order_id();
        let mut order = MockOrder {
            report: OrderReport {
                order_id: order_id.clone(),
                status: OrderStatus::Live,
                executed_amount: Decimal::ZERO,
                original_amount: request.amount,
                side: request.side,
                price: request.price,
                client_order_id: request.client_order_id.clone(),
            },
            symbol: request.symbol.clone(),
            stop_price,
        };

        if self.auto_fill {
            if let Some(&price) = state.prices.get(&request.symbol) {
                if order.crosses(price) {
                    order.fill();
                }
            }
        }

        info!(
            %order_id,
            symbol = %request.symbol,
            side = %request.side,
            amount = %request.amount,
            price = %request.price,
            status = %order.report.status,
            "Mock order placed"
        );

        let mut placed = PlacedOrder::from(order.report.clone());
        placed.stop_price = request.stop_price;
        state.placed.push(request.clone());
        state.orders.insert(order_id, order);
        Ok(placed)
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelledOrder> {
        let mut state = self.state.write().await;
        state.enter(GatewayOp::CancelOrder)?;

        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| not_found(order_id))?;

        if !order.is_open() {
            return Err(GatewayError::api(
                "OrderNotLive",
                format!("order {order_id} is already {}", order.report.status),
            ));
        }

        order.report.status = OrderStatus::Cancelled;
        debug!(%order_id, "Mock order cancelled");
        Ok(CancelledOrder {
            order_id: order_id.to_string(),
            cancelled: true,
        })
    }

    async fn check_order_status(&self, order_id: &str) -> GatewayResult<OrderReport> {
        let mut state = self.state.write().await;
        state.enter(GatewayOp::CheckOrderStatus)?;

        state
            .orders
            .get(order_id)
            .map(|o| o.report.clone())
            .ok_or_else(|| not_found(order_id))
    }

    async fn get_active_orders(&self) -> GatewayResult<Vec<OrderReport>> {
        let mut state = self.state.write().await;
        state.enter(GatewayOp::GetActiveOrders)?;

        let mut active: Vec<OrderReport> = state
            .orders
            .values()
            .filter(|o| o.is_open())
            .map(|o| o.report.clone())
            .collect();
        active.sort_by_key(|o| o.order_id.parse::<u64>().unwrap_or(u64::MAX));
        Ok(active)
    }

    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        let mut state = self.state.write().await;
        state.enter(GatewayOp::GetPrice)?;

        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::api("InvalidSymbol", format!("no price for {symbol}")))
    }
}

/// Paper trading gateway: real market prices, simulated order book.
pub struct PaperExchange<M> {
    market: M,
    book: MockExchange,
}

impl<M: ExchangeGateway> PaperExchange<M> {
    pub fn new(market: M) -> Self {
        Self {
            market,
            book: MockExchange::with_auto_fill(),
        }
    }
}

#[async_trait]
impl<M: ExchangeGateway> ExchangeGateway for PaperExchange<M> {
    async fn place_order(&self, request: &PlaceOrderRequest) -> GatewayResult<PlacedOrder> {
        self.book.place_order(request).await
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelledOrder> {
        self.book.cancel_order(order_id).await
    }

    async fn check_order_status(&self, order_id: &str) -> GatewayResult<OrderReport> {
        self.book.check_order_status(order_id).await
    }

    async fn get_active_orders(&self) -> GatewayResult<Vec<OrderReport>> {
        self.book.get_active_orders().await
    }

    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        let price = self.market.get_price(symbol).await?;
        self.book.set_price(symbol, price).await;
        Ok(price)
    }
}
