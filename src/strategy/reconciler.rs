//! Brings local order records in line with the exchange.

use super::model::{Order, OrderStatus, OrderUpdate, Strategy};
use crate::error::StoreError;
use crate::exchange::{ExchangeGateway, OrderReport};
use crate::persistence::StrategyStore;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
    /// (order id, from, to) for every status change applied
    pub transitions: Vec<(String, OrderStatus, OrderStatus)>,
}

pub struct OrderReconciler<'a> {
    gateway: &'a dyn ExchangeGateway,
    store: &'a dyn StrategyStore,
}

impl<'a> OrderReconciler<'a> {
    pub fn new(gateway: &'a dyn ExchangeGateway, store: &'a dyn StrategyStore) -> Self {
        Self { gateway, store }
    }

    /// Refresh every non-terminal order of `strategy`.
    ///
    /// Status only moves forward; backward reports are logged and dropped.
    /// Exchange failures are counted and skipped. Store failures abort.
    pub async fn reconcile(&self, strategy: &Strategy) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        for mut order in self.store.get_orders_for_strategy(strategy.id)? {
            if !order.is_active() {
                continue;
            }
            report.checked += 1;

            let remote = match self.gateway.check_order_status(&order.order_id).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(
                        strategy = %strategy.name,
                        order_id = %order.order_id,
                        error = %e,
                        "Failed to check order status"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let from = order.status;
            let Some(update) = apply_report(self.store, &mut order, &remote)? else {
                continue;
            };
            report.updated += 1;

            if let Some(status) = update.status {
                info!(
                    strategy = %strategy.name,
                    order_id = %order.order_id,
                    from = %from,
                    to = %status,
                    executed = %remote.executed_amount,
                    "Order status changed"
                );
                report.transitions.push((order.order_id.clone(), from, status));
            }
        }

        if report.checked > 0 {
            debug!(
                strategy = %strategy.name,
                checked = report.checked,
                updated = report.updated,
                failed = report.failed,
                "Orders reconciled"
            );
        }
        Ok(report)
    }
}

/// Apply an exchange report to `order`, in the store and in place.
///
/// Status only moves forward; backward reports are logged and dropped.
/// Returns the update written, or `None` when nothing changed.
pub(crate) fn apply_report(
    store: &dyn StrategyStore,
    order: &mut Order,
    remote: &OrderReport,
) -> Result<Option<OrderUpdate>, StoreError> {
    let update = if remote.status == order.status {
        if remote.executed_amount == order.executed_amount {
            return Ok(None);
        }
        OrderUpdate {
            status: None,
            executed_amount: Some(remote.executed_amount),
        }
    } else if order.status.can_advance_to(remote.status) {
        OrderUpdate {
            status: Some(remote.status),
            executed_amount: Some(remote.executed_amount),
        }
    } else {
        warn!(
            order_id = %order.order_id,
            local = %order.status,
            remote = %remote.status,
            "Ignoring backward status report"
        );
        return Ok(None);
    };

    store.update_order(&order.order_id, &update)?;
    if let Some(status) = update.status {
        order.status = status;
    }
    order.executed_amount = remote.executed_amount;
    Ok(Some(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::exchange::GatewayOp;
    use crate::strategy::fixtures::{breakout_descriptor, range_descriptor, Harness};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_forward_transitions_applied() {
        let mut harness = Harness::new();
        harness.set_price(dec!(0.31)).await;
        let strategy = harness.submit(range_descriptor()).await;
        harness.tick().await;
        let order_id = harness.orders(strategy.id)[0].order_id.clone();

        harness.exchange.partial_fill(&order_id, dec!(400)).await;
        let reconciler = OrderReconciler::new(harness.exchange.as_ref(), harness.store.as_ref());
        let report = reconciler.reconcile(&strategy).await.unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(
            report.transitions,
            vec![(order_id.clone(), OrderStatus::Accepted, OrderStatus::PartialFill)]
        );
        let stored = harness.orders(strategy.id).remove(0);
        assert_eq!(stored.executed_amount, dec!(400));
    }

    #[tokio::test]
    async fn test_backward_report_ignored() {
        let mut harness = Harness::new();
        harness.set_price(dec!(0.31)).await;
        let strategy = harness.submit(range_descriptor()).await;
        harness.tick().await;
        let order_id = harness.orders(strategy.id)[0].order_id.clone();

        harness.exchange.partial_fill(&order_id, dec!(400)).await;
        let reconciler = OrderReconciler::new(harness.exchange.as_ref(), harness.store.as_ref());
        reconciler.reconcile(&strategy).await.unwrap();

        // Exchange glitches back to LIVE
        harness.exchange.set_order_status(&order_id, OrderStatus::Live).await;
        let report = reconciler.reconcile(&strategy).await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(harness.orders(strategy.id)[0].status, OrderStatus::PartialFill);
    }

    #[tokio::test]
    async fn test_failures_counted_and_batch_continues() {
        let mut harness = Harness::new();
        harness.set_price(dec!(0.36)).await;
        let strategy = harness.submit(breakout_descriptor()).await;
        harness.tick().await;
        let buy = harness.orders(strategy.id)[0].order_id.clone();
        harness.fill(&buy).await;
        harness.tick().await;
        assert_eq!(harness.orders(strategy.id).len(), 3);

        harness
            .exchange
            .fail_next(GatewayOp::CheckOrderStatus, GatewayError::transport("timeout"))
            .await;
        let reconciler = OrderReconciler::new(harness.exchange.as_ref(), harness.store.as_ref());
        let report = reconciler.reconcile(&strategy).await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(harness.exchange.calls(GatewayOp::CheckOrderStatus).await, 3);
    }
}
