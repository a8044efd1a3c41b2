//! Range trading: buy at support, sell at resistance.

use super::model::{OrderSide, OrderStatus, StrategyKind, StrategyState};
use super::orders::{Cycle, OrderIntent};
use super::policy::StrategyPolicy;
use crate::error::StrategyError;
use async_trait::async_trait;
use tracing::debug;

pub struct RangePolicy;

#[async_trait]
impl StrategyPolicy for RangePolicy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Range
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[
            "support_price",
            "resistance_price",
            "amount",
            "stop_loss_price",
        ]
    }

    async fn execute(&self, cycle: &mut Cycle<'_>) -> Result<(), StrategyError> {
        if cycle.filled_orders(OrderSide::Sell).next().is_some() {
            return cycle.finish(StrategyState::Completed, None).await;
        }

        let support = cycle.config_decimal("support_price")?;
        let resistance = cycle.config_decimal("resistance_price")?;
        let amount = cycle.config_decimal("amount")?;
        let stop_loss = cycle.config_decimal("stop_loss_price")?;

        let entry = cycle
            .entry_order()?
            .map(|o| (o.order_id.clone(), o.status, o.price));
        let Some((entry_id, entry_status, entry_price)) = entry else {
            cycle
                .place(OrderIntent::limit(OrderSide::Buy, amount, support))
                .await?;
            return Ok(());
        };

        if entry_status != OrderStatus::Filled {
            debug!(
                strategy = %cycle.strategy.name,
                order_id = %entry_id,
                status = %entry_status,
                "Waiting for entry fill"
            );
            return Ok(());
        }

        if cycle.has_active_sell() && cycle.price <= stop_loss {
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

        if !cycle.has_active_sell() {
            let exit = OrderIntent::limit(OrderSide::Sell, amount, resistance);
            cycle.place(exit.closing(Some(&entry_id))).await?;
        }
        Ok(())
    }
}
