//! Realized profit and tax reserve bookkeeping.

use super::model::{Order, OrderSide, OrderStatus, Strategy};
use super::policy::policy_for;
use crate::config::ProfitConfig;
use crate::error::StrategyError;
use crate::persistence::StrategyStore;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Outcome of one closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeProfit {
    pub profit: Decimal,
    pub tax_reserve: Decimal,
    pub available: Decimal,
}

/// Splits realized gains between the tax reserve and available profit.
#[derive(Debug, Clone, Copy)]
pub struct ProfitAccountant {
    tax_reserve_rate: Decimal,
}

impl ProfitAccountant {
    pub fn new(tax_reserve_rate: Decimal) -> Self {
        Self { tax_reserve_rate }
    }

    /// Profit of selling `amount` at `sell_price` against `buy_price`.
    ///
    /// Losses reserve nothing.
    pub fn compute(&self, sell_price: Decimal, buy_price: Decimal, amount: Decimal) -> TradeProfit {
        let profit = (sell_price - buy_price) * amount;
        if profit > Decimal::ZERO {
            let tax_reserve = profit * self.tax_reserve_rate;
            TradeProfit {
                profit,
                tax_reserve,
                available: profit - tax_reserve,
            }
        } else {
            TradeProfit {
                profit,
                tax_reserve: Decimal::ZERO,
                available: Decimal::ZERO,
            }
        }
    }

    pub fn apply(&self, strategy: &mut Strategy, trade: &TradeProfit) {
        strategy.total_profit += trade.profit;
        strategy.realized_profit += trade.profit;
        strategy.tax_reserve += trade.tax_reserve;
        strategy.available_profit += trade.available;
    }

    /// Credit every filled SELL not yet credited.
    ///
    /// The strategy's totals and the order's flag are written together, so a
    /// fill is never counted twice. Returns the profit credited this call.
    pub fn settle(
        &self,
        store: &dyn StrategyStore,
        strategy: &mut Strategy,
        orders: &mut [Order],
    ) -> Result<Decimal, StrategyError> {
        let policy = policy_for(strategy.kind);
        let mut credited = Decimal::ZERO;

        for index in 0..orders.len() {
            let order = &orders[index];
            if order.side != OrderSide::Sell
                || order.status != OrderStatus::Filled
                || order.profit_recorded
            {
                continue;
            }

            let Some(buy_price) = policy.cost_basis(strategy, order, orders)? else {
                warn!(
                    strategy = %strategy.name,
                    order_id = %order.order_id,
                    "No cost basis for filled sell, profit not recorded"
                );
                continue;
            };

            let amount = if order.executed_amount > Decimal::ZERO {
                order.executed_amount
            } else {
                order.amount
            };
            let trade = self.compute(order.price, buy_price, amount);

            let mut updated = strategy.clone();
            self.apply(&mut updated, &trade);
            let recorded = store.record_fill_profit(&updated, &order.order_id)?;

            if recorded {
                info!(
                    strategy = %strategy.name,
                    order_id = %order.order_id,
                    sell_price = %order.price,
                    buy_price = %buy_price,
                    %amount,
                    profit = %trade.profit,
                    tax_reserve = %trade.tax_reserve,
                    available = %trade.available,
                    "Profit recorded"
                );
                *strategy = updated;
                credited += trade.profit;
            }
            orders[index].profit_recorded = true;
        }

        Ok(credited)
    }
}

impl Default for ProfitAccountant {
    fn default() -> Self {
        Self::from(&ProfitConfig::default())
    }
}

impl From<&ProfitConfig> for ProfitAccountant {
    fn from(config: &ProfitConfig) -> Self {
        Self::new(config.tax_reserve_rate)
    }
}
