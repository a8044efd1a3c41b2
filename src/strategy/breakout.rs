//! Breakout entry with two take-profit exits.

use super::model::{OrderSide, OrderStatus, StrategyKind, StrategyState};
use super::orders::{Cycle, OrderIntent};
use super::policy::StrategyPolicy;
use crate::error::StrategyError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Entry is armed once price is within 0.5% of the breakout level.
const ENTRY_PROXIMITY: Decimal = dec!(0.995);

pub struct BreakoutPolicy;

#[async_trait]
impl StrategyPolicy for BreakoutPolicy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Breakout
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[
            "breakout_price",
            "amount",
            "take_profit_1",
            "take_profit_2",
            "stop_loss",
        ]
    }

    async fn execute(&self, cycle: &mut Cycle<'_>) -> Result<(), StrategyError> {
        let breakout = cycle.config_decimal("breakout_price")?;
        let amount = cycle.config_decimal("amount")?;
        let take_profit_1 = cycle.config_decimal("take_profit_1")?;
        let take_profit_2 = cycle.config_decimal("take_profit_2")?;
        let stop_loss = cycle.config_decimal("stop_loss")?;

        if cycle.sold_amount() >= amount {
            return cycle.finish(StrategyState::Completed, None).await;
        }

        let entry = cycle
            .entry_order()?
            .map(|o| (o.order_id.clone(), o.status, o.price));
        let Some((entry_id, entry_status, entry_price)) = entry else {
            if cycle.price >= breakout * ENTRY_PROXIMITY {
                cycle
                    .place(OrderIntent::limit(OrderSide::Buy, amount, breakout))
                    .await?;
            } else {
                debug!(
                    strategy = %cycle.strategy.name,
                    price = %cycle.price,
                    %breakout,
                    "Below breakout level"
                );
            }
            return Ok(());
        };

        if entry_status != OrderStatus::Filled {
            return Ok(());
        }

        if cycle.price <= stop_loss {
            return cycle
                .protective_stop(stop_loss, amount, Some(entry_id))
                .await;
        }

        if cycle
            .trail_stop(entry_price, stop_loss, amount, Some(&entry_id))
            .await?
        {
            return Ok(());
        }

        let exits_started = cycle.filled_orders(OrderSide::Sell).next().is_some();
        if !exits_started && !cycle.has_active_sell() {
            let half = amount / dec!(2);
            for target in [take_profit_1, take_profit_2] {
                let exit = OrderIntent::limit(OrderSide::Sell, half, target);
                cycle.place(exit.closing(Some(&entry_id))).await?;
            }
        }
        Ok(())
    }
}
