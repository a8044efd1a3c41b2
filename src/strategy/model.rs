//! Strategy and order records plus their state machines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Type-specific thresholds, stored as numeric strings.
pub type StrategyConfig = BTreeMap<String, String>;

/// Supported strategy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Range,
    Breakout,
    TakeProfit,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Range => "range",
            StrategyKind::Breakout => "breakout",
            StrategyKind::TakeProfit => "take_profit",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "range" => Ok(StrategyKind::Range),
            "breakout" => Ok(StrategyKind::Breakout),
            "take_profit" => Ok(StrategyKind::TakeProfit),
            other => Err(format!("unknown strategy kind: {other}")),
        }
    }
}

/// Strategy lifecycle state.
///
/// ```text
/// INIT -> ACTIVE | PAUSED | CANCELED | FAILED
/// ACTIVE -> PAUSED | COMPLETED | CANCELED | FAILED
/// PAUSED -> ACTIVE | CANCELED | FAILED
/// ```
/// COMPLETED, CANCELED and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyState {
    Init,
    Active,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl StrategyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyState::Init => "init",
            StrategyState::Active => "active",
            StrategyState::Paused => "paused",
            StrategyState::Completed => "completed",
            StrategyState::Failed => "failed",
            StrategyState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StrategyState::Completed | StrategyState::Failed | StrategyState::Canceled
        )
    }

    pub fn can_transition_to(&self, next: StrategyState) -> bool {
        use StrategyState::*;
        match self {
            Init => matches!(next, Active | Paused | Canceled | Failed),
            Active => matches!(next, Paused | Completed | Canceled | Failed),
            Paused => matches!(next, Active | Canceled | Failed),
            Completed | Failed | Canceled => false,
        }
    }
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(StrategyState::Init),
            "active" => Ok(StrategyState::Active),
            "paused" => Ok(StrategyState::Paused),
            "completed" => Ok(StrategyState::Completed),
            "failed" => Ok(StrategyState::Failed),
            "canceled" => Ok(StrategyState::Canceled),
            other => Err(format!("unknown strategy state: {other}")),
        }
    }
}

/// Canonical order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Accepted,
    Live,
    PartialFill,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Accepted => "accepted",
            OrderStatus::Live => "live",
            OrderStatus::PartialFill => "partial_fill",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Position along the fill path; terminal outcomes share the top rank.
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Accepted => 0,
            OrderStatus::Live => 1,
            OrderStatus::PartialFill => 2,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(OrderStatus::Accepted),
            "live" => Ok(OrderStatus::Live),
            "partial_fill" => Ok(OrderStatus::PartialFill),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

/// Locally tracked order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    LimitBuy,
    LimitSell,
    StopLimitBuy,
    StopLimitSell,
}

impl OrderKind {
    pub fn limit(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => OrderKind::LimitBuy,
            OrderSide::Sell => OrderKind::LimitSell,
        }
    }

    pub fn stop_limit(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => OrderKind::StopLimitBuy,
            OrderSide::Sell => OrderKind::StopLimitSell,
        }
    }

    pub fn side(&self) -> OrderSide {
        match self {
            OrderKind::LimitBuy | OrderKind::StopLimitBuy => OrderSide::Buy,
            OrderKind::LimitSell | OrderKind::StopLimitSell => OrderSide::Sell,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, OrderKind::StopLimitBuy | OrderKind::StopLimitSell)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::LimitBuy => "limit_buy",
            OrderKind::LimitSell => "limit_sell",
            OrderKind::StopLimitBuy => "stop_limit_buy",
            OrderKind::StopLimitSell => "stop_limit_sell",
        }
    }
}

impl FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "limit_buy" => Ok(OrderKind::LimitBuy),
            "limit_sell" => Ok(OrderKind::LimitSell),
            "stop_limit_buy" => Ok(OrderKind::StopLimitBuy),
            "stop_limit_sell" => Ok(OrderKind::StopLimitSell),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// Operator-supplied strategy definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    pub symbol: String,
    #[serde(default = "default_descriptor_state")]
    pub state: StrategyState,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub config: StrategyConfig,
}

fn default_descriptor_state() -> StrategyState {
    StrategyState::Active
}

fn default_check_interval() -> u64 {
    60
}

/// A stored strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    pub kind: StrategyKind,
    pub symbol: String,
    pub config: StrategyConfig,
    pub state: StrategyState,
    pub is_active: bool,
    /// Seconds between cycles
    pub check_interval: u64,
    /// `None` until the first cycle runs
    pub last_checked_at: Option<DateTime<Utc>>,
    pub total_profit: Decimal,
    pub realized_profit: Decimal,
    pub tax_reserve: Decimal,
    pub available_profit: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    /// Whether a cycle is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            None => true,
            Some(last) => {
                let interval = i64::try_from(self.check_interval).unwrap_or(i64::MAX);
                (now - last).num_seconds() >= interval
            }
        }
    }

    /// Move to `next`, keeping `is_active` in step with the state.
    pub fn transition(&mut self, next: StrategyState) -> Result<(), crate::error::StrategyError> {
        if !self.state.can_transition_to(next) {
            return Err(crate::error::StrategyError::InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.is_active = next == StrategyState::Active;
        Ok(())
    }
}

/// Fields for a new strategy record.
#[derive(Debug, Clone)]
pub struct NewStrategy {
    pub name: String,
    pub kind: StrategyKind,
    pub symbol: String,
    pub config: StrategyConfig,
    pub state: StrategyState,
    pub check_interval: u64,
}

impl From<&StrategyDescriptor> for NewStrategy {
    fn from(descriptor: &StrategyDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            symbol: descriptor.symbol.clone(),
            config: descriptor.config.clone(),
            state: StrategyState::Init,
            check_interval: descriptor.check_interval,
        }
    }
}

/// A stored order.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub order_id: String,
    pub strategy_id: i64,
    pub status: OrderStatus,
    pub side: OrderSide,
    pub amount: Decimal,
    pub executed_amount: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub symbol: String,
    pub order_type: OrderKind,
    pub parent_order_id: Option<String>,
    pub profit_recorded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Fields for a new order record.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: String,
    pub strategy_id: i64,
    pub status: OrderStatus,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub symbol: String,
    pub order_type: OrderKind,
    pub parent_order_id: Option<String>,
}

/// Partial update applied by `update_order`.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub status: Option<OrderStatus>,
    pub executed_amount: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_order_status_moves_forward_only() {
        use OrderStatus::*;
        assert!(Accepted.can_advance_to(Live));
        assert!(Accepted.can_advance_to(Filled));
        assert!(Live.can_advance_to(PartialFill));
        assert!(PartialFill.can_advance_to(Filled));
        assert!(Live.can_advance_to(Cancelled));
        assert!(!Filled.can_advance_to(Live));
        assert!(!Live.can_advance_to(Accepted));
        assert!(!PartialFill.can_advance_to(Live));
        assert!(!Cancelled.can_advance_to(Filled));
        assert!(!Live.can_advance_to(Live));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [
            StrategyState::Completed,
            StrategyState::Failed,
            StrategyState::Canceled,
        ] {
            for next in [
                StrategyState::Init,
                StrategyState::Active,
                StrategyState::Paused,
                StrategyState::Completed,
                StrategyState::Failed,
                StrategyState::Canceled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(StrategyState::Paused.can_transition_to(StrategyState::Active));
        assert!(StrategyState::Active.can_transition_to(StrategyState::Paused));
        assert!(!StrategyState::Paused.can_transition_to(StrategyState::Completed));
    }

    #[test]
    fn test_round_trip_names() {
        for status in [
            OrderStatus::Accepted,
            OrderStatus::Live,
            OrderStatus::PartialFill,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert_eq!("take_profit".parse(), Ok(StrategyKind::TakeProfit));
        assert!("grid".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut strategy = Strategy {
            id: 1,
            name: "doge".into(),
            kind: StrategyKind::Range,
            symbol: "dogeusd".into(),
            config: StrategyConfig::new(),
            state: StrategyState::Active,
            is_active: true,
            check_interval: 60,
            last_checked_at: None,
            total_profit: Decimal::ZERO,
            realized_profit: Decimal::ZERO,
            tax_reserve: Decimal::ZERO,
            available_profit: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        assert!(strategy.is_due(now));

        strategy.last_checked_at = Some(now - Duration::seconds(30));
        assert!(!strategy.is_due(now));

        strategy.last_checked_at = Some(now - Duration::days(2));
        assert!(strategy.is_due(now));

        // Intervals past i64::MAX saturate instead of wrapping negative
        strategy.check_interval = u64::MAX;
        assert!(!strategy.is_due(now));
    }

    #[test]
    fn test_transition_tracks_is_active() {
        let now = Utc::now();
        let mut strategy = Strategy {
            id: 1,
            name: "doge".into(),
            kind: StrategyKind::Range,
            symbol: "dogeusd".into(),
            config: StrategyConfig::new(),
            state: StrategyState::Init,
            is_active: false,
            check_interval: 60,
            last_checked_at: None,
            total_profit: Decimal::ZERO,
            realized_profit: Decimal::ZERO,
            tax_reserve: Decimal::ZERO,
            available_profit: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        strategy.transition(StrategyState::Active).unwrap();
        assert!(strategy.is_active);
        strategy.transition(StrategyState::Completed).unwrap();
        assert!(!strategy.is_active);
        assert!(strategy.transition(StrategyState::Active).is_err());
    }
}
