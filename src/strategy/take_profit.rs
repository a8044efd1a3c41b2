//! Exit management for a position bought outside the engine.

use super::model::{Order, OrderSide, Strategy, StrategyKind, StrategyState};
use super::orders::{Cycle, OrderIntent};
use super::policy::StrategyPolicy;
use crate::error::StrategyError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct TakeProfitPolicy;

#[async_trait]
impl StrategyPolicy for TakeProfitPolicy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TakeProfit
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[
            "current_position",
            "entry_price",
            "take_profit_price",
            "stop_loss_price",
        ]
    }

    /// The position was opened elsewhere, so the configured entry price is
    /// the only cost basis.
    fn cost_basis(
        &self,
        strategy: &Strategy,
        _sell: &Order,
        _orders: &[Order],
    ) -> Result<Option<Decimal>, StrategyError> {
        let raw = strategy
            .config
            .get("entry_price")
            .ok_or_else(|| StrategyError::MissingConfigValue("entry_price".to_string()))?;
        Decimal::from_str(raw.trim())
            .map(Some)
            .map_err(|_| StrategyError::BadConfigValue {
                key: "entry_price".to_string(),
                value: raw.clone(),
            })
    }

    async fn execute(&self, cycle: &mut Cycle<'_>) -> Result<(), StrategyError> {
        if cycle.filled_orders(OrderSide::Sell).next().is_some() {
            return cycle.finish(StrategyState::Completed, None).await;
        }

        let position = cycle.config_decimal("current_position")?;
        let entry_price = cycle.config_decimal("entry_price")?;
        let take_profit = cycle.config_decimal("take_profit_price")?;
        let stop_loss = cycle.config_decimal("stop_loss_price")?;

        if cycle.price <= stop_loss {
            return cycle.protective_stop(stop_loss, position, None).await;
        }

        if cycle
            .trail_stop(entry_price, stop_loss, position, None)
            .await?
        {
            return Ok(());
        }

        if !cycle.has_active_sell() {
            cycle
                .place(OrderIntent::limit(OrderSide::Sell, position, take_profit))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::strategy::fixtures::{take_profit_descriptor, with_config, Harness};
    use crate::strategy::{OrderKind, OrderSide, OrderStatus, StrategyState};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_sells_position_at_target() {
        let mut harness = Harness::new();
        harness.set_price(dec!(0.36)).await;
        let strategy = harness.submit(take_profit_descriptor()).await;

        harness.tick().await;
        harness.tick().await;
        let orders = harness.orders(strategy.id);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!((orders[0].amount, orders[0].price), (dec!(2000), dec!(0.40)));
        assert_eq!(orders[0].parent_order_id, None);

        harness.fill(&orders[0].order_id).await;
        harness.tick().await;

        let strategy = harness.strategy(strategy.id);
        assert_eq!(strategy.state, StrategyState::Completed);
        // (0.40 - 0.30) * 2000
        assert_eq!(strategy.total_profit, dec!(200));
        assert_eq!(strategy.available_profit, dec!(100));
    }

    #[tokio::test]
    async fn test_stop_loss_records_loss() {
        let mut harness = Harness::new();
        harness.set_price(dec!(0.36)).await;
        let strategy = harness.submit(take_profit_descriptor()).await;

        harness.tick().await;
        harness.set_price(dec!(0.25)).await;
        harness.tick().await;

        let orders = harness.orders(strategy.id);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].price, dec!(0.2574));
        assert_eq!(harness.strategy(strategy.id).state, StrategyState::Completed);

        // The stop keeps settling after completion
        harness.fill(&orders[1].order_id).await;
        harness.tick().await;

        let strategy = harness.strategy(strategy.id);
        // (0.2574 - 0.30) * 2000
        assert_eq!(strategy.total_profit, dec!(-85.2));
        assert_eq!(strategy.realized_profit, dec!(-85.2));
        assert_eq!(strategy.tax_reserve, dec!(0));
        assert_eq!(strategy.available_profit, dec!(0));
    }

    #[tokio::test]
    async fn test_trailing_stop_only_moves_up() {
        let mut harness = Harness::new();
        harness.set_price(dec!(0.36)).await;
        let descriptor = with_config(
            take_profit_descriptor(),
            &[("use_trailing_stop", "true"), ("trail_percent", "0.05")],
        );
        let strategy = harness.submit(descriptor).await;

        // 0.36 * 0.95 = 0.342
        harness.tick().await;
        harness.tick().await;
        let orders = harness.orders(strategy.id);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_type, OrderKind::StopLimitSell);
        assert_eq!(orders[0].stop_price, Some(dec!(0.342)));
        assert_eq!(orders[0].price, dec!(0.33858));
        assert_eq!(orders[0].amount, dec!(2000));

        // 0.40 * 0.95 = 0.38 replaces the lower stop
        harness.set_price(dec!(0.40)).await;
        harness.tick().await;
        let orders = harness.orders(strategy.id);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
        assert_eq!(orders[1].stop_price, Some(dec!(0.38)));

        // A pullback never lowers it
        harness.set_price(dec!(0.39)).await;
        harness.tick().await;
        assert_eq!(harness.orders(strategy.id).len(), 2);

        harness.fill(&orders[1].order_id).await;
        harness.tick().await;
        let strategy = harness.strategy(strategy.id);
        assert_eq!(strategy.state, StrategyState::Completed);
        // (0.3762 - 0.30) * 2000
        assert_eq!(strategy.total_profit, dec!(152.4));
    }
}
