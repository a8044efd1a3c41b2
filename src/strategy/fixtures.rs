//! Shared engine test harness: mock exchange, in-memory store, and a clock
//! the tests advance by hand.

use super::manager::StrategyManager;
use super::model::{
    NewOrder, NewStrategy, Order, OrderUpdate, Strategy, StrategyConfig, StrategyDescriptor,
    StrategyKind, StrategyState,
};
use super::profit::ProfitAccountant;
use super::scheduler::{Scheduler, TickSummary};
use crate::config::SchedulerConfig;
use crate::error::StoreError;
use crate::exchange::{ExchangeGateway, MockExchange, RetryPolicy, RetryingGateway};
use crate::persistence::{SqliteStore, StoreResult, StrategyStore};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) const SYMBOL: &str = "dogeusd";

fn descriptor(name: &str, kind: StrategyKind, config: &[(&str, &str)]) -> StrategyDescriptor {
    StrategyDescriptor {
        name: name.to_string(),
        kind,
        symbol: SYMBOL.to_string(),
        state: StrategyState::Active,
        check_interval: 60,
        config: config
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<StrategyConfig>(),
    }
}

pub(crate) fn range_descriptor() -> StrategyDescriptor {
    descriptor(
        "doge-range",
        StrategyKind::Range,
        &[
            ("support_price", "0.30"),
            ("resistance_price", "0.35"),
            ("amount", "1000"),
            ("stop_loss_price", "0.28"),
        ],
    )
}

pub(crate) fn breakout_descriptor() -> StrategyDescriptor {
    descriptor(
        "doge-breakout",
        StrategyKind::Breakout,
        &[
            ("breakout_price", "0.35"),
            ("amount", "1000"),
            ("take_profit_1", "0.37"),
            ("take_profit_2", "0.40"),
            ("stop_loss", "0.33"),
        ],
    )
}

/// Add or override config entries on a fixture descriptor.
pub(crate) fn with_config(
    mut descriptor: StrategyDescriptor,
    entries: &[(&str, &str)],
) -> StrategyDescriptor {
    for (key, value) in entries {
        descriptor.config.insert(key.to_string(), value.to_string());
    }
    descriptor
}

pub(crate) fn take_profit_descriptor() -> StrategyDescriptor {
    descriptor(
        "doge-take-profit",
        StrategyKind::TakeProfit,
        &[
            ("current_position", "2000"),
            ("entry_price", "0.30"),
            ("take_profit_price", "0.40"),
            ("stop_loss_price", "0.26"),
        ],
    )
}

/// SQLite store whose order writes can be made to fail.
pub(crate) struct FlakyStore {
    inner: SqliteStore,
    fail_order_writes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            fail_order_writes: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_order_writes(&self, fail: bool) {
        self.fail_order_writes.store(fail, Ordering::SeqCst);
    }

    fn check_order_write(&self) -> StoreResult<()> {
        if self.fail_order_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl StrategyStore for FlakyStore {
    fn save_strategy(&self, strategy: &NewStrategy) -> StoreResult<Strategy> {
        self.inner.save_strategy(strategy)
    }

    fn get_strategy(&self, id: i64) -> StoreResult<Option<Strategy>> {
        self.inner.get_strategy(id)
    }

    fn get_strategy_by_name(&self, name: &str) -> StoreResult<Option<Strategy>> {
        self.inner.get_strategy_by_name(name)
    }

    fn get_active_strategies(&self) -> StoreResult<Vec<Strategy>> {
        self.inner.get_active_strategies()
    }

    fn get_settling_strategies(&self) -> StoreResult<Vec<Strategy>> {
        self.inner.get_settling_strategies()
    }

    fn list_strategies(&self) -> StoreResult<Vec<Strategy>> {
        self.inner.list_strategies()
    }

    fn update_strategy(&self, strategy: &Strategy) -> StoreResult<()> {
        self.inner.update_strategy(strategy)
    }

    fn touch_strategy(&self, id: i64, checked_at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.touch_strategy(id, checked_at)
    }

    fn save_order(&self, order: &NewOrder) -> StoreResult<Order> {
        self.check_order_write()?;
        self.inner.save_order(order)
    }

    fn update_order(&self, order_id: &str, update: &OrderUpdate) -> StoreResult<Option<Order>> {
        self.check_order_write()?;
        self.inner.update_order(order_id, update)
    }

    fn get_order(&self, order_id: &str) -> StoreResult<Option<Order>> {
        self.inner.get_order(order_id)
    }

    fn get_orders_for_strategy(&self, strategy_id: i64) -> StoreResult<Vec<Order>> {
        self.inner.get_orders_for_strategy(strategy_id)
    }

    fn get_orders_by_parent_id(&self, parent_order_id: &str) -> StoreResult<Vec<Order>> {
        self.inner.get_orders_by_parent_id(parent_order_id)
    }

    fn record_fill_profit(&self, strategy: &Strategy, order_id: &str) -> StoreResult<bool> {
        self.inner.record_fill_profit(strategy, order_id)
    }
}

/// Engine wired to a manual-fill mock exchange.
///
/// Each [`tick`](Harness::tick) advances the clock by one minute, which is
/// the check interval of every fixture descriptor.
pub(crate) struct Harness {
    pub exchange: Arc<MockExchange>,
    pub store: Arc<FlakyStore>,
    pub scheduler: Scheduler,
    pub manager: StrategyManager,
    pub now: DateTime<Utc>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let exchange = Arc::new(MockExchange::new());
        Self::build(exchange.clone(), exchange)
    }

    /// Engine whose gateway calls go through the retry wrapper, as in
    /// production. `exchange` still records every underlying attempt.
    pub(crate) fn with_retries(policy: RetryPolicy) -> Self {
        let exchange = Arc::new(MockExchange::new());
        let gateway = Arc::new(RetryingGateway::new(exchange.clone(), policy));
        Self::build(exchange, gateway)
    }

    fn build(exchange: Arc<MockExchange>, gateway: Arc<dyn ExchangeGateway>) -> Self {
        let store = Arc::new(FlakyStore::new());
        let scheduler = Scheduler::new(
            gateway.clone(),
            store.clone(),
            ProfitAccountant::default(),
            SchedulerConfig::default(),
        );
        let manager = StrategyManager::new(gateway, store.clone());

        Self {
            exchange,
            store,
            scheduler,
            manager,
            now: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    pub(crate) async fn set_price(&self, price: Decimal) {
        self.exchange.set_price(SYMBOL, price).await;
    }

    pub(crate) async fn submit(&self, descriptor: StrategyDescriptor) -> Strategy {
        self.manager.submit(&descriptor).await.unwrap()
    }

    pub(crate) async fn tick(&mut self) -> TickSummary {
        self.now += Duration::seconds(60);
        self.scheduler.tick_at(self.now).await.unwrap()
    }

    pub(crate) async fn fill(&self, order_id: &str) {
        assert!(
            self.exchange.fill_order(order_id).await,
            "order {order_id} is not open"
        );
    }

    pub(crate) fn orders(&self, strategy_id: i64) -> Vec<Order> {
        self.store.get_orders_for_strategy(strategy_id).unwrap()
    }

    pub(crate) fn strategy(&self, id: i64) -> Strategy {
        self.store.get_strategy(id).unwrap().unwrap()
    }
}
