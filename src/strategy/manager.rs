//! Operator-facing strategy lifecycle: submit, pause, resume, cancel, report.

use super::model::{NewStrategy, Order, Strategy, StrategyDescriptor, StrategyState};
use super::orders::OrderDesk;
use super::policy::policy_for;
use crate::error::StrategyError;
use crate::exchange::ExchangeGateway;
use crate::persistence::StrategyStore;
use std::sync::Arc;
use tracing::{info, warn};

/// One row of the status report.
#[derive(Debug, Clone)]
pub struct StrategyStatus {
    pub strategy: Strategy,
    pub open_orders: Vec<Order>,
}

pub struct StrategyManager {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn StrategyStore>,
}

impl StrategyManager {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, store: Arc<dyn StrategyStore>) -> Self {
        Self { gateway, store }
    }

    fn desk(&self) -> OrderDesk<'_> {
        OrderDesk::new(self.gateway.as_ref(), self.store.as_ref())
    }

    /// Create or refresh a strategy from an operator descriptor.
    ///
    /// Resubmitting an unchanged config returns the stored record. A changed
    /// config retires the previous record and starts a new one.
    pub async fn submit(
        &self,
        descriptor: &StrategyDescriptor,
    ) -> Result<Strategy, StrategyError> {
        let missing = policy_for(descriptor.kind).missing_keys(&descriptor.config);
        if !missing.is_empty() {
            return Err(StrategyError::InvalidConfig {
                name: descriptor.name.clone(),
                missing,
            });
        }

        if let Some(existing) = self.store.get_strategy_by_name(&descriptor.name)? {
            if existing.config == descriptor.config {
                info!(
                    strategy = %existing.name,
                    state = %existing.state,
                    "Strategy unchanged, keeping stored record"
                );
                return Ok(existing);
            }
            info!(strategy = %existing.name, "Strategy config changed, replacing");
            if !existing.state.is_terminal() {
                self.retire(existing, StrategyState::Canceled).await?;
            }
        }

        let mut strategy = self.store.save_strategy(&NewStrategy::from(descriptor))?;
        if descriptor.state != StrategyState::Init {
            strategy.transition(descriptor.state)?;
            self.store.update_strategy(&strategy)?;
        }

        info!(
            strategy = %strategy.name,
            id = strategy.id,
            kind = %strategy.kind,
            symbol = %strategy.symbol,
            state = %strategy.state,
            "Strategy submitted"
        );
        Ok(strategy)
    }

    /// Cancel working orders and stop driving the strategy until resumed.
    pub async fn pause(&self, name: &str) -> Result<Strategy, StrategyError> {
        let strategy = self.find(name)?;
        self.retire(strategy, StrategyState::Paused).await
    }

    pub async fn resume(&self, name: &str) -> Result<Strategy, StrategyError> {
        let mut strategy = self.find(name)?;
        strategy.transition(StrategyState::Active)?;
        self.store.update_strategy(&strategy)?;
        info!(strategy = %strategy.name, "Strategy resumed");
        Ok(strategy)
    }

    /// Cancel working orders and mark the strategy CANCELED.
    pub async fn cancel(&self, name: &str) -> Result<Strategy, StrategyError> {
        let strategy = self.find(name)?;
        self.retire(strategy, StrategyState::Canceled).await
    }

    /// Every strategy with its non-terminal orders, oldest first.
    pub fn status(&self) -> Result<Vec<StrategyStatus>, StrategyError> {
        self.store
            .list_strategies()?
            .into_iter()
            .map(|strategy| -> Result<StrategyStatus, StrategyError> {
                let open_orders = self
                    .store
                    .get_orders_for_strategy(strategy.id)?
                    .into_iter()
                    .filter(Order::is_active)
                    .collect();
                Ok(StrategyStatus {
                    strategy,
                    open_orders,
                })
            })
            .collect()
    }

    fn find(&self, name: &str) -> Result<Strategy, StrategyError> {
        self.store
            .get_strategy_by_name(name)?
            .ok_or_else(|| StrategyError::NotFound(name.to_string()))
    }

    /// Cancel active orders, then move to `state`.
    async fn retire(
        &self,
        mut strategy: Strategy,
        state: StrategyState,
    ) -> Result<Strategy, StrategyError> {
        // Validate before touching the book
        if !strategy.state.can_transition_to(state) {
            return Err(StrategyError::InvalidTransition {
                name: strategy.name.clone(),
                from: strategy.state,
                to: state,
            });
        }

        let mut orders = self.store.get_orders_for_strategy(strategy.id)?;
        let report = self.desk().cancel_active(&mut orders, None, None).await?;
        if !report.failed.is_empty() {
            warn!(
                strategy = %strategy.name,
                failed = ?report.failed,
                "Some orders could not be cancelled"
            );
        }

        strategy.transition(state)?;
        self.store.update_strategy(&strategy)?;
        info!(
            strategy = %strategy.name,
            state = %state,
            cancelled = report.cancelled,
            "Strategy state changed"
        );
        Ok(strategy)
    }
}
