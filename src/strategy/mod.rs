//! Strategy execution engine.
//!
//! Contains the core logic for:
//! - Reconciling local order state against the exchange
//! - Deciding the next orders for each strategy kind
//! - Recording realized profit and the tax reserve
//! - Driving every strategy on its own cadence

mod breakout;
mod manager;
mod model;
mod orders;
mod policy;
mod profit;
mod range;
mod reconciler;
mod scheduler;
mod take_profit;

#[cfg(test)]
pub(crate) mod fixtures;

pub use manager::{StrategyManager, StrategyStatus};
pub use model::{
    NewOrder, NewStrategy, Order, OrderKind, OrderSide, OrderStatus, OrderUpdate, Strategy,
    StrategyConfig, StrategyDescriptor, StrategyKind, StrategyState,
};
pub use orders::{CancelReport, Cycle, OrderDesk, OrderIntent};
pub use policy::{policy_for, StrategyPolicy};
pub use profit::{ProfitAccountant, TradeProfit};
pub use reconciler::{OrderReconciler, ReconcileReport};
pub use scheduler::{Scheduler, TickSummary};
