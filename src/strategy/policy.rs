//! Policy trait shared by all strategy kinds.

use super::breakout::BreakoutPolicy;
use super::model::{Order, Strategy, StrategyConfig, StrategyKind};
use super::orders::Cycle;
use super::range::RangePolicy;
use super::take_profit::TakeProfitPolicy;
use crate::error::StrategyError;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Decides the next order action for one strategy kind.
#[async_trait]
pub trait StrategyPolicy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Config keys that must be present.
    fn required_keys(&self) -> &'static [&'static str];

    fn missing_keys(&self, config: &StrategyConfig) -> Vec<String> {
        self.required_keys()
            .iter()
            .filter(|key| !config.contains_key(**key))
            .map(|key| key.to_string())
            .collect()
    }

    /// Presence check only; values are parsed when first used.
    fn validate_config(&self, config: &StrategyConfig) -> bool {
        self.missing_keys(config).is_empty()
    }

    /// Buy price a filled SELL is measured against.
    ///
    /// Defaults to the price of the BUY the SELL closes.
    fn cost_basis(
        &self,
        _strategy: &Strategy,
        sell: &Order,
        orders: &[Order],
    ) -> Result<Option<Decimal>, StrategyError> {
        let Some(parent) = sell.parent_order_id.as_deref() else {
            return Ok(None);
        };
        Ok(orders
            .iter()
            .find(|o| o.order_id == parent)
            .map(|o| o.price))
    }

    /// Act on the reconciled order set at the current price.
    ///
    /// Must be safe to run every tick: it only places what is missing.
    async fn execute(&self, cycle: &mut Cycle<'_>) -> Result<(), StrategyError>;
}

static RANGE: RangePolicy = RangePolicy;
static BREAKOUT: BreakoutPolicy = BreakoutPolicy;
static TAKE_PROFIT: TakeProfitPolicy = TakeProfitPolicy;

/// Policy implementing `kind`.
pub fn policy_for(kind: StrategyKind) -> &'static dyn StrategyPolicy {
    match kind {
        StrategyKind::Range => &RANGE,
        StrategyKind::Breakout => &BREAKOUT,
        StrategyKind::TakeProfit => &TAKE_PROFIT,
    }
}
