//! Order placement, cancellation and the per-cycle working set.

use super::model::{
    NewOrder, Order, OrderKind, OrderSide, OrderStatus, OrderUpdate, Strategy, StrategyState,
};
use super::reconciler::apply_report;
use crate::error::StrategyError;
use crate::exchange::{ExchangeGateway, ExchangeOrderType, PlaceOrderRequest};
use crate::persistence::StrategyStore;
use crate::utils::decimal::round_down_to_step;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use tracing::{error, info, warn};

/// Protective stops are priced this far under the stop threshold.
const STOP_LIMIT_DISCOUNT: Decimal = dec!(0.99);

/// Trail used when `use_trailing_stop` is set without `trail_percent`.
const DEFAULT_TRAIL_PERCENT: Decimal = dec!(0.01);

/// An order a policy wants on the book.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub kind: OrderKind,
    pub amount: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub parent_order_id: Option<String>,
}

impl OrderIntent {
    pub fn limit(side: OrderSide, amount: Decimal, price: Decimal) -> Self {
        Self {
            kind: OrderKind::limit(side),
            amount,
            price,
            stop_price: None,
            parent_order_id: None,
        }
    }

    /// Limit order at `price` that rests off the book until `stop_price` trades.
    pub fn stop_limit(
        side: OrderSide,
        amount: Decimal,
        stop_price: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            kind: OrderKind::stop_limit(side),
            amount,
            price,
            stop_price: Some(stop_price),
            parent_order_id: None,
        }
    }

    pub fn closing(mut self, parent_order_id: Option<&str>) -> Self {
        self.parent_order_id = parent_order_id.map(str::to_string);
        self
    }
}

/// Result of [`OrderDesk::cancel_active`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    pub cancelled: usize,
    /// Orders the exchange refused or failed to cancel
    pub failed: Vec<String>,
}

/// Gateway and store handles for order side effects.
#[derive(Clone, Copy)]
pub struct OrderDesk<'a> {
    gateway: &'a dyn ExchangeGateway,
    store: &'a dyn StrategyStore,
}

impl<'a> OrderDesk<'a> {
    pub fn new(gateway: &'a dyn ExchangeGateway, store: &'a dyn StrategyStore) -> Self {
        Self { gateway, store }
    }

    pub fn store(&self) -> &'a dyn StrategyStore {
        self.store
    }

    /// Place and persist an order for `strategy`.
    ///
    /// Every order the engine creates goes through here. Terminal strategies
    /// are refused before the exchange is contacted.
    pub async fn place(
        &self,
        strategy: &Strategy,
        intent: OrderIntent,
    ) -> Result<Order, StrategyError> {
        if strategy.state.is_terminal() {
            warn!(
                strategy = %strategy.name,
                state = %strategy.state,
                "Refusing to place order for terminal strategy"
            );
            return Err(StrategyError::Terminal(strategy.name.clone()));
        }

        let side = intent.kind.side();
        let request = PlaceOrderRequest {
            symbol: strategy.symbol.clone(),
            amount: intent.amount,
            price: intent.price,
            side,
            order_type: ExchangeOrderType::from(intent.kind),
            stop_price: intent.stop_price,
            client_order_id: None,
        };

        let placed = self.gateway.place_order(&request).await?;

        let record = NewOrder {
            order_id: placed.order_id.clone(),
            strategy_id: strategy.id,
            status: OrderStatus::Accepted,
            side,
            amount: intent.amount,
            price: intent.price,
            stop_price: intent.stop_price,
            symbol: strategy.symbol.clone(),
            order_type: intent.kind,
            parent_order_id: intent.parent_order_id,
        };

        match self.store.save_order(&record) {
            Ok(order) => {
                info!(
                    strategy = %strategy.name,
                    order_id = %order.order_id,
                    side = %side,
                    amount = %order.amount,
                    price = %order.price,
                    "Order placed"
                );
                Ok(order)
            }
            Err(e) => {
                // Untracked orders must not stay on the book
                error!(
                    strategy = %strategy.name,
                    order_id = %placed.order_id,
                    error = %e,
                    "Failed to persist placed order, cancelling it"
                );
                if let Err(cancel_err) = self.gateway.cancel_order(&placed.order_id).await {
                    error!(
                        order_id = %placed.order_id,
                        error = %cancel_err,
                        "Failed to cancel untracked order"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Cancel one order on the exchange and mark it CANCELLED locally.
    pub async fn cancel(&self, order: &mut Order) -> Result<(), StrategyError> {
        self.gateway.cancel_order(&order.order_id).await?;
        let update = OrderUpdate {
            status: Some(OrderStatus::Cancelled),
            executed_amount: None,
        };
        self.store.update_order(&order.order_id, &update)?;
        order.status = OrderStatus::Cancelled;
        info!(order_id = %order.order_id, side = %order.side, "Order cancelled");
        Ok(())
    }

    /// Cancel every active order except `keep`.
    ///
    /// Exchange failures are logged and reported back; store failures abort.
    pub async fn cancel_active(
        &self,
        orders: &mut [Order],
        side: Option<OrderSide>,
        keep: Option<&str>,
    ) -> Result<CancelReport, StrategyError> {
        let mut report = CancelReport::default();
        for order in orders.iter_mut() {
            if !order.is_active()
                || side.is_some_and(|s| s != order.side)
                || keep == Some(order.order_id.as_str())
            {
                continue;
            }
            match self.cancel(order).await {
                Ok(()) => report.cancelled += 1,
                Err(StrategyError::Gateway(e)) => {
                    warn!(order_id = %order.order_id, error = %e, "Failed to cancel order");
                    report.failed.push(order.order_id.clone());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Re-read one order from the exchange and record what changed.
    pub async fn refresh(&self, order: &mut Order) -> Result<(), StrategyError> {
        let remote = self.gateway.check_order_status(&order.order_id).await?;
        apply_report(self.store, order, &remote)?;
        Ok(())
    }
}

/// One strategy's view during a single cycle: its orders after
/// reconciliation, the current price, and the desk to act through.
pub struct Cycle<'a> {
    pub strategy: &'a mut Strategy,
    pub orders: Vec<Order>,
    pub price: Decimal,
    desk: OrderDesk<'a>,
}

impl<'a> Cycle<'a> {
    pub fn new(
        strategy: &'a mut Strategy,
        orders: Vec<Order>,
        price: Decimal,
        desk: OrderDesk<'a>,
    ) -> Self {
        Self {
            strategy,
            orders,
            price,
            desk,
        }
    }

    /// Parse a required decimal from the strategy config.
    pub fn config_decimal(&self, key: &str) -> Result<Decimal, StrategyError> {
        let raw = self
            .strategy
            .config
            .get(key)
            .ok_or_else(|| StrategyError::MissingConfigValue(key.to_string()))?;
        Decimal::from_str(raw.trim()).map_err(|_| StrategyError::BadConfigValue {
            key: key.to_string(),
            value: raw.clone(),
        })
    }

    /// Optional `price_tick` used to round derived prices.
    fn price_tick(&self) -> Result<Option<Decimal>, StrategyError> {
        if self.strategy.config.contains_key("price_tick") {
            self.config_decimal("price_tick").map(Some)
        } else {
            Ok(None)
        }
    }

    /// Trail fraction when `use_trailing_stop` is enabled.
    fn trail_percent(&self) -> Result<Option<Decimal>, StrategyError> {
        let enabled = self.strategy.config.get("use_trailing_stop").is_some_and(|v| {
            matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        });
        if !enabled {
            return Ok(None);
        }

        let trail = if self.strategy.config.contains_key("trail_percent") {
            self.config_decimal("trail_percent")?
        } else {
            DEFAULT_TRAIL_PERCENT
        };
        if trail <= Decimal::ZERO || trail >= Decimal::ONE {
            return Err(StrategyError::BadConfigValue {
                key: "trail_percent".to_string(),
                value: trail.to_string(),
            });
        }
        Ok(Some(trail))
    }

    /// Limit price for a stop at `stop`, rounded to `price_tick` if set.
    fn stop_limit_price(&self, stop: Decimal) -> Result<Decimal, StrategyError> {
        let price = stop * STOP_LIMIT_DISCOUNT;
        Ok(match self.price_tick()? {
            Some(tick) => round_down_to_step(price, tick),
            None => price,
        })
    }

    /// The BUY that opened (or is opening) the position.
    ///
    /// Cancelled BUYs are ignored so a fresh entry can be placed after a
    /// pause. A rejected entry fails the strategy.
    pub fn entry_order(&self) -> Result<Option<&Order>, StrategyError> {
        let entry = self
            .orders
            .iter()
            .rev()
            .find(|o| o.side == OrderSide::Buy && o.status != OrderStatus::Cancelled);

        match entry {
            Some(order) if order.status == OrderStatus::Rejected => {
                Err(StrategyError::EntryRejected(order.order_id.clone()))
            }
            other => Ok(other),
        }
    }

    pub fn active_orders(&self, side: OrderSide) -> impl Iterator<Item = &Order> {
        self.orders
            .iter()
            .filter(move |o| o.side == side && o.is_active())
    }

    pub fn filled_orders(&self, side: OrderSide) -> impl Iterator<Item = &Order> {
        self.orders
            .iter()
            .filter(move |o| o.side == side && o.status == OrderStatus::Filled)
    }

    pub fn has_active_sell(&self) -> bool {
        self.active_orders(OrderSide::Sell).next().is_some()
    }

    /// Quantity already sold across every SELL, including partial fills.
    pub fn sold_amount(&self) -> Decimal {
        self.orders
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .map(|o| match o.status {
                OrderStatus::Filled => o.amount,
                _ => o.executed_amount,
            })
            .sum()
    }

    /// Place an order and add it to the working set.
    pub async fn place(&mut self, intent: OrderIntent) -> Result<&Order, StrategyError> {
        let order = self.desk.place(self.strategy, intent).await?;
        let index = self.orders.len();
        self.orders.push(order);
        Ok(&self.orders[index])
    }

    /// Pull every working SELL off the book.
    ///
    /// A SELL the exchange will not cancel is re-read, since it may have
    /// filled in the meantime. If it is still open, or its state cannot be
    /// read, the cycle is aborted so nothing is sold twice.
    async fn withdraw_sells(&mut self) -> Result<(), StrategyError> {
        let report = self
            .desk
            .cancel_active(&mut self.orders, Some(OrderSide::Sell), None)
            .await?;

        for order_id in report.failed {
            let Some(order) = self.orders.iter_mut().find(|o| o.order_id == order_id) else {
                continue;
            };
            match self.desk.refresh(order).await {
                Ok(()) => {}
                Err(StrategyError::Gateway(e)) => {
                    warn!(order_id = %order_id, error = %e, "Failed to re-read uncancelled order");
                    return Err(StrategyError::OrderUnresolved(order_id));
                }
                Err(e) => return Err(e),
            }
            if order.is_active() {
                return Err(StrategyError::OrderUnresolved(order_id));
            }
            info!(
                strategy = %self.strategy.name,
                order_id = %order.order_id,
                status = %order.status,
                executed = %order.executed_amount,
                "Order closed before it could be cancelled"
            );
        }
        Ok(())
    }

    /// Exit at market-adjacent price: cancel active SELLs, place a SELL for
    /// what is left of `position` just under `stop`, and complete the
    /// strategy with the stop order left working.
    pub async fn protective_stop(
        &mut self,
        stop: Decimal,
        position: Decimal,
        parent_order_id: Option<String>,
    ) -> Result<(), StrategyError> {
        warn!(
            strategy = %self.strategy.name,
            price = %self.price,
            stop = %stop,
            position = %position,
            "Stop loss triggered"
        );

        self.withdraw_sells().await?;

        let remaining = position - self.sold_amount();
        if remaining <= Decimal::ZERO {
            info!(strategy = %self.strategy.name, "Position already sold, no stop placed");
            return self.finish(StrategyState::Completed, None).await;
        }

        let price = self.stop_limit_price(stop)?;
        let intent = OrderIntent::limit(OrderSide::Sell, remaining, price)
            .closing(parent_order_id.as_deref());
        let stop_order_id = self.place(intent).await?.order_id.clone();

        self.finish(StrategyState::Completed, Some(stop_order_id.as_str()))
            .await
    }

    /// Keep a stop-limit SELL trailing under the price while it is above
    /// `entry_price`, when the strategy enables `use_trailing_stop`.
    ///
    /// The stop sits at `max(stop_loss, price * (1 - trail_percent))` and
    /// only moves up. Placing or raising it withdraws the other working
    /// SELLs first. Returns whether the trailing stop is armed this cycle.
    pub async fn trail_stop(
        &mut self,
        entry_price: Decimal,
        stop_loss: Decimal,
        position: Decimal,
        parent_order_id: Option<&str>,
    ) -> Result<bool, StrategyError> {
        let Some(trail) = self.trail_percent()? else {
            return Ok(false);
        };
        if self.price <= entry_price {
            return Ok(false);
        }

        let mut level = (self.price * (Decimal::ONE - trail)).max(stop_loss);
        if let Some(tick) = self.price_tick()? {
            level = round_down_to_step(level, tick);
        }

        let working = self
            .orders
            .iter()
            .filter(|o| o.is_active() && o.order_type == OrderKind::StopLimitSell)
            .filter_map(|o| o.stop_price)
            .max();
        if working.is_some_and(|current| current >= level) {
            return Ok(true);
        }

        self.withdraw_sells().await?;
        let remaining = position - self.sold_amount();
        if remaining <= Decimal::ZERO {
            return Ok(true);
        }

        let limit = self.stop_limit_price(level)?;
        let intent = OrderIntent::stop_limit(OrderSide::Sell, remaining, level, limit)
            .closing(parent_order_id);
        let order_id = self.place(intent).await?.order_id.clone();

        info!(
            strategy = %self.strategy.name,
            order_id = %order_id,
            price = %self.price,
            stop = %level,
            previous = ?working,
            amount = %remaining,
            "Trailing stop raised"
        );
        Ok(true)
    }

    /// Cancel remaining active orders (except `keep`) and move to `state`.
    pub async fn finish(
        &mut self,
        state: StrategyState,
        keep: Option<&str>,
    ) -> Result<(), StrategyError> {
        let report = self.desk.cancel_active(&mut self.orders, None, keep).await?;
        if !report.failed.is_empty() {
            warn!(
                strategy = %self.strategy.name,
                failed = ?report.failed,
                "Orders left open at finish"
            );
        }
        self.strategy.transition(state)?;
        self.desk.store().update_strategy(self.strategy)?;

        info!(
            strategy = %self.strategy.name,
            state = %state,
            total_profit = %self.strategy.total_profit,
            "Strategy finished"
        );
        Ok(())
    }
}
