//! Periodic driver: reconcile, settle and execute every due strategy.

use super::model::{Order, Strategy, StrategyState};
use super::orders::{Cycle, OrderDesk};
use super::policy::policy_for;
use super::profit::ProfitAccountant;
use super::reconciler::OrderReconciler;
use crate::config::SchedulerConfig;
use crate::error::{StoreError, StrategyError};
use crate::exchange::ExchangeGateway;
use crate::persistence::StrategyStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counts from one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Cycles run for active strategies
    pub executed: usize,
    /// Terminal strategies reconciled and settled only
    pub settled: usize,
    /// Strategies whose cycle ended in an error
    pub errors: usize,
}

pub struct Scheduler {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn StrategyStore>,
    accountant: ProfitAccountant,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn StrategyStore>,
        accountant: ProfitAccountant,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            accountant,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops [`run`](Self::run) after the current tick.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Tick until shutdown is requested.
    pub async fn run(&self) {
        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            "Starting strategy monitor loop"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            let pause = match self.tick_at(Utc::now()).await {
                Ok(summary) => {
                    if summary.executed + summary.settled > 0 {
                        debug!(
                            executed = summary.executed,
                            settled = summary.settled,
                            errors = summary.errors,
                            "Tick complete"
                        );
                    }
                    self.config.tick_interval()
                }
                Err(e) => {
                    error!(error = %e, "Tick failed, backing off");
                    self.config.error_backoff()
                }
            };
            tokio::time::sleep(pause).await;
        }

        info!("Strategy monitor stopped");
    }

    /// Run one pass over every strategy due at `now`.
    ///
    /// A failure in one strategy never stops the others. Only failing to
    /// list strategies fails the tick.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, StoreError> {
        let mut summary = TickSummary::default();

        for strategy in self.store.get_active_strategies()? {
            if !strategy.is_due(now) {
                continue;
            }
            let id = strategy.id;
            match self.run_cycle(strategy).await {
                Ok(()) => summary.executed += 1,
                Err(e) => {
                    self.handle_failure(id, e).await;
                    summary.errors += 1;
                }
            }
            self.touch(id, now);
        }

        for strategy in self.store.get_settling_strategies()? {
            if !strategy.is_due(now) {
                continue;
            }
            let (id, name) = (strategy.id, strategy.name.clone());
            match self.settle_only(strategy).await {
                Ok(()) => summary.settled += 1,
                Err(e) => {
                    warn!(strategy = %name, error = %e, "Settlement of finished strategy failed");
                    summary.errors += 1;
                }
            }
            self.touch(id, now);
        }

        Ok(summary)
    }

    /// Reconcile, settle, fetch the price and let the policy act.
    async fn run_cycle(&self, mut strategy: Strategy) -> Result<(), StrategyError> {
        let mut orders = self.reconcile(&strategy).await?;
        self.accountant
            .settle(self.store.as_ref(), &mut strategy, &mut orders)?;

        let price = self.gateway.get_price(&strategy.symbol).await?;
        debug!(strategy = %strategy.name, symbol = %strategy.symbol, %price, "Running cycle");

        let desk = OrderDesk::new(self.gateway.as_ref(), self.store.as_ref());
        let mut cycle = Cycle::new(&mut strategy, orders, price, desk);
        policy_for(cycle.strategy.kind).execute(&mut cycle).await
    }

    /// Keep order state and profit current for a strategy that no longer trades.
    async fn settle_only(&self, mut strategy: Strategy) -> Result<(), StrategyError> {
        let mut orders = self.reconcile(&strategy).await?;
        let credited = self
            .accountant
            .settle(self.store.as_ref(), &mut strategy, &mut orders)?;
        if !credited.is_zero() {
            info!(
                strategy = %strategy.name,
                %credited,
                state = %strategy.state,
                "Late fill settled"
            );
        }
        Ok(())
    }

    async fn reconcile(&self, strategy: &Strategy) -> Result<Vec<Order>, StrategyError> {
        OrderReconciler::new(self.gateway.as_ref(), self.store.as_ref())
            .reconcile(strategy)
            .await?;
        Ok(self.store.get_orders_for_strategy(strategy.id)?)
    }

    /// Store failures and unresolved orders leave the strategy as is;
    /// anything else fails it.
    async fn handle_failure(&self, id: i64, err: StrategyError) {
        if err.defers_to_next_cycle() {
            error!(strategy_id = id, error = %err, "Cycle aborted, strategy left unchanged");
            return;
        }

        let mut strategy = match self.store.get_strategy(id) {
            Ok(Some(strategy)) => strategy,
            Ok(None) => return,
            Err(e) => {
                error!(strategy_id = id, error = %e, "Failed to reload strategy after error");
                return;
            }
        };
        error!(strategy = %strategy.name, error = %err, "Strategy cycle failed");

        if strategy.state.is_terminal() {
            return;
        }

        let mut orders = match self.store.get_orders_for_strategy(id) {
            Ok(orders) => orders,
            Err(e) => {
                error!(strategy = %strategy.name, error = %e, "Failed to load orders for cleanup");
                return;
            }
        };
        let desk = OrderDesk::new(self.gateway.as_ref(), self.store.as_ref());
        match desk.cancel_active(&mut orders, None, None).await {
            Ok(report) if !report.failed.is_empty() => {
                error!(
                    strategy = %strategy.name,
                    failed = ?report.failed,
                    "Orders of failed strategy left open"
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!(
                    strategy = %strategy.name,
                    error = %e,
                    "Failed to cancel orders of failed strategy"
                );
            }
        }

        if let Err(e) = strategy.transition(StrategyState::Failed) {
            error!(strategy = %strategy.name, error = %e, "Cannot mark strategy failed");
            return;
        }
        match self.store.update_strategy(&strategy) {
            Ok(()) => warn!(strategy = %strategy.name, "Strategy marked FAILED"),
            Err(e) => error!(
                strategy = %strategy.name,
                error = %e,
                "Failed to persist FAILED state"
            ),
        }
    }

    fn touch(&self, id: i64, now: DateTime<Utc>) {
        if let Err(e) = self.store.touch_strategy(id, now) {
            error!(strategy_id = id, error = %e, "Failed to record check time");
        }
    }
}
