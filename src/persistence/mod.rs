//! SQLite persistence for strategies and their orders.
//!
//! Persists everything the engine needs to resume after a restart:
//! - Strategy definitions, lifecycle state and profit totals
//! - Every order placed on a strategy's behalf and its last known status
//! - Which fills have already been credited as profit

use crate::error::StoreError;
use crate::strategy::{
    NewOrder, NewStrategy, Order, OrderUpdate, Strategy, StrategyConfig, StrategyState,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage for strategies and orders.
///
/// Every write is a single transaction.
pub trait StrategyStore: Send + Sync {
    /// Insert a new strategy record and return it with its id.
    fn save_strategy(&self, strategy: &NewStrategy) -> StoreResult<Strategy>;

    fn get_strategy(&self, id: i64) -> StoreResult<Option<Strategy>>;

    /// Most recent strategy record with this name.
    fn get_strategy_by_name(&self, name: &str) -> StoreResult<Option<Strategy>>;

    /// Strategies the scheduler should drive: active and not terminal.
    fn get_active_strategies(&self) -> StoreResult<Vec<Strategy>>;

    /// Terminal strategies with open orders or uncredited sell fills.
    fn get_settling_strategies(&self) -> StoreResult<Vec<Strategy>>;

    fn list_strategies(&self) -> StoreResult<Vec<Strategy>>;

    /// Persist state, activity flag, config and profit fields.
    fn update_strategy(&self, strategy: &Strategy) -> StoreResult<()>;

    /// Set `last_checked_at`.
    fn touch_strategy(&self, id: i64, checked_at: DateTime<Utc>) -> StoreResult<()>;

    fn save_order(&self, order: &NewOrder) -> StoreResult<Order>;

    /// Apply a partial update. Returns the updated order, or `None` if unknown.
    fn update_order(&self, order_id: &str, update: &OrderUpdate) -> StoreResult<Option<Order>>;

    fn get_order(&self, order_id: &str) -> StoreResult<Option<Order>>;

    /// Orders of a strategy, oldest first.
    fn get_orders_for_strategy(&self, strategy_id: i64) -> StoreResult<Vec<Order>>;

    /// Orders closing the position opened by `parent_order_id`.
    fn get_orders_by_parent_id(&self, parent_order_id: &str) -> StoreResult<Vec<Order>>;

    /// Flag `order_id` as credited and write the strategy's profit fields.
    ///
    /// Returns false, writing nothing, if the order was already credited.
    fn record_fill_profit(&self, strategy: &Strategy, order_id: &str) -> StoreResult<bool>;
}

const STRATEGY_COLUMNS: &str = "id, name, kind, symbol, config, state, is_active, check_interval, \
     last_checked_at, total_profit, realized_profit, tax_reserve, available_profit, \
     created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_id, strategy_id, status, side, amount, executed_amount, \
     price, stop_price, symbol, order_type, parent_order_id, profit_recorded, \
     created_at, updated_at";

const TERMINAL_STATES: &str = "('completed', 'failed', 'canceled')";

/// SQLite-backed [`StrategyStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {parent:?}"))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {db_path:?}"))?;
        init_schema(&conn)?;

        info!("Strategy store initialized at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fresh private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_strategies(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> StoreResult<Vec<Strategy>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, StrategyRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(StrategyRow::into_strategy).collect()
    }

    fn query_orders(&self, sql: &str, args: impl rusqlite::Params) -> StoreResult<Vec<Order>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, OrderRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OrderRow::into_order).collect()
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS strategies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            symbol TEXT NOT NULL,
            config TEXT NOT NULL,
            state TEXT NOT NULL,
            is_active INTEGER NOT NULL,
            check_interval INTEGER NOT NULL,
            last_checked_at TEXT,
            total_profit TEXT NOT NULL DEFAULT '0',
            realized_profit TEXT NOT NULL DEFAULT '0',
            tax_reserve TEXT NOT NULL DEFAULT '0',
            available_profit TEXT NOT NULL DEFAULT '0',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_strategies_name ON strategies(name);

        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL UNIQUE,
            strategy_id INTEGER NOT NULL REFERENCES strategies(id),
            status TEXT NOT NULL,
            side TEXT NOT NULL,
            amount TEXT NOT NULL,
            executed_amount TEXT NOT NULL DEFAULT '0',
            price TEXT NOT NULL,
            stop_price TEXT,
            symbol TEXT NOT NULL,
            order_type TEXT NOT NULL,
            parent_order_id TEXT,
            profit_recorded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_strategy ON orders(strategy_id);
        CREATE INDEX IF NOT EXISTS idx_orders_parent ON orders(parent_order_id);
        "#,
    )?;
    debug!("Database schema initialized");
    Ok(())
}

// ==================== Row Decoding ====================

fn parse_decimal(value: &str, field: &str) -> StoreResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| StoreError::Corrupt(format!("{field}={value:?}: {e}")))
}

fn parse_time(value: &str, field: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{field}={value:?}: {e}")))
}

fn parse_tag<T: FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(StoreError::Corrupt)
}

/// Raw strategy columns, decoded outside the rusqlite callback so corrupt
/// values surface as [`StoreError::Corrupt`].
struct StrategyRow {
    id: i64,
    name: String,
    kind: String,
    symbol: String,
    config: String,
    state: String,
    is_active: bool,
    check_interval: u64,
    last_checked_at: Option<String>,
    total_profit: String,
    realized_profit: String,
    tax_reserve: String,
    available_profit: String,
    created_at: String,
    updated_at: String,
}

impl StrategyRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            symbol: row.get(3)?,
            config: row.get(4)?,
            state: row.get(5)?,
            is_active: row.get(6)?,
            check_interval: row.get(7)?,
            last_checked_at: row.get(8)?,
            total_profit: row.get(9)?,
            realized_profit: row.get(10)?,
            tax_reserve: row.get(11)?,
            available_profit: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_strategy(self) -> StoreResult<Strategy> {
        let config: StrategyConfig = serde_json::from_str(&self.config)?;
        Ok(Strategy {
            id: self.id,
            name: self.name,
            kind: parse_tag(&self.kind)?,
            symbol: self.symbol,
            config,
            state: parse_tag(&self.state)?,
            is_active: self.is_active,
            check_interval: self.check_interval,
            last_checked_at: self
                .last_checked_at
                .as_deref()
                .map(|t| parse_time(t, "last_checked_at"))
                .transpose()?,
            total_profit: parse_decimal(&self.total_profit, "total_profit")?,
            realized_profit: parse_decimal(&self.realized_profit, "realized_profit")?,
            tax_reserve: parse_decimal(&self.tax_reserve, "tax_reserve")?,
            available_profit: parse_decimal(&self.available_profit, "available_profit")?,
            created_at: parse_time(&self.created_at, "created_at")?,
            updated_at: parse_time(&self.updated_at, "updated_at")?,
        })
    }
}

struct OrderRow {
    id: i64,
    order_id: String,
    strategy_id: i64,
    status: String,
    side: String,
    amount: String,
    executed_amount: String,
    price: String,
    stop_price: Option<String>,
    symbol: String,
    order_type: String,
    parent_order_id: Option<String>,
    profit_recorded: bool,
    created_at: String,
    updated_at: String,
}

impl OrderRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            order_id: row.get(1)?,
            strategy_id: row.get(2)?,
            status: row.get(3)?,
            side: row.get(4)?,
            amount: row.get(5)?,
            executed_amount: row.get(6)?,
            price: row.get(7)?,
            stop_price: row.get(8)?,
            symbol: row.get(9)?,
            order_type: row.get(10)?,
            parent_order_id: row.get(11)?,
            profit_recorded: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_order(self) -> StoreResult<Order> {
        Ok(Order {
            id: self.id,
            order_id: self.order_id,
            strategy_id: self.strategy_id,
            status: parse_tag(&self.status)?,
            side: parse_tag(&self.side)?,
            amount: parse_decimal(&self.amount, "amount")?,
            executed_amount: parse_decimal(&self.executed_amount, "executed_amount")?,
            price: parse_decimal(&self.price, "price")?,
            stop_price: self
                .stop_price
                .as_deref()
                .map(|p| parse_decimal(p, "stop_price"))
                .transpose()?,
            symbol: self.symbol,
            order_type: parse_tag(&self.order_type)?,
            parent_order_id: self.parent_order_id,
            profit_recorded: self.profit_recorded,
            created_at: parse_time(&self.created_at, "created_at")?,
            updated_at: parse_time(&self.updated_at, "updated_at")?,
        })
    }
}

impl StrategyStore for SqliteStore {
    fn save_strategy(&self, strategy: &NewStrategy) -> StoreResult<Strategy> {
        let now = Utc::now();
        let config = serde_json::to_string(&strategy.config)?;

        let id = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            tx.execute(
                r#"
                INSERT INTO strategies (name, kind, symbol, config, state, is_active,
                                        check_interval, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                "#,
                params![
                    strategy.name,
                    strategy.kind.as_str(),
                    strategy.symbol,
                    config,
                    strategy.state.as_str(),
                    strategy.state == StrategyState::Active,
                    strategy.check_interval,
                    now.to_rfc3339(),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            id
        };

        debug!(id, name = %strategy.name, kind = %strategy.kind, "Strategy saved");
        self.get_strategy(id)?
            .ok_or_else(|| StoreError::Corrupt(format!("strategy {id} missing after insert")))
    }

    fn get_strategy(&self, id: i64) -> StoreResult<Option<Strategy>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?1"),
                [id],
                StrategyRow::read,
            )
            .optional()?;
        row.map(StrategyRow::into_strategy).transpose()
    }

    fn get_strategy_by_name(&self, name: &str) -> StoreResult<Option<Strategy>> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {STRATEGY_COLUMNS} FROM strategies \
                     WHERE name = ?1 ORDER BY id DESC LIMIT 1"
                ),
                [name],
                StrategyRow::read,
            )
            .optional()?;
        row.map(StrategyRow::into_strategy).transpose()
    }

    fn get_active_strategies(&self) -> StoreResult<Vec<Strategy>> {
        self.query_strategies(
            &format!(
                "SELECT {STRATEGY_COLUMNS} FROM strategies \
                 WHERE is_active = 1 AND state NOT IN {TERMINAL_STATES} ORDER BY id"
            ),
            [],
        )
    }

    fn get_settling_strategies(&self) -> StoreResult<Vec<Strategy>> {
        self.query_strategies(
            &format!(
                "SELECT {STRATEGY_COLUMNS} FROM strategies s \
                 WHERE s.state IN {TERMINAL_STATES} AND EXISTS ( \
                     SELECT 1 FROM orders o WHERE o.strategy_id = s.id AND ( \
                         o.status NOT IN ('filled', 'cancelled', 'rejected') \
                         OR (o.side = 'sell' AND o.status = 'filled' AND o.profit_recorded = 0))) \
                 ORDER BY s.id"
            ),
            [],
        )
    }

    fn list_strategies(&self) -> StoreResult<Vec<Strategy>> {
        self.query_strategies(
            &format!("SELECT {STRATEGY_COLUMNS} FROM strategies ORDER BY id"),
            [],
        )
    }

    fn update_strategy(&self, strategy: &Strategy) -> StoreResult<()> {
        let config = serde_json::to_string(&strategy.config)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            UPDATE strategies SET
                config = ?2,
                state = ?3,
                is_active = ?4,
                check_interval = ?5,
                last_checked_at = ?6,
                total_profit = ?7,
                realized_profit = ?8,
                tax_reserve = ?9,
                available_profit = ?10,
                updated_at = ?11
            WHERE id = ?1
            "#,
            params![
                strategy.id,
                config,
                strategy.state.as_str(),
                strategy.is_active,
                strategy.check_interval,
                strategy.last_checked_at.map(|t| t.to_rfc3339()),
                strategy.total_profit.to_string(),
                strategy.realized_profit.to_string(),
                strategy.tax_reserve.to_string(),
                strategy.available_profit.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn touch_strategy(&self, id: i64, checked_at: DateTime<Utc>) -> StoreResult<()> {
        self.conn()?.execute(
            "UPDATE strategies SET last_checked_at = ?2 WHERE id = ?1",
            params![id, checked_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn save_order(&self, order: &NewOrder) -> StoreResult<Order> {
        let now = Utc::now().to_rfc3339();
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            tx.execute(
                r#"
                INSERT INTO orders (order_id, strategy_id, status, side, amount, executed_amount,
                                    price, stop_price, symbol, order_type, parent_order_id,
                                    created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, '0', ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                "#,
                params![
                    order.order_id,
                    order.strategy_id,
                    order.status.as_str(),
                    order.side.as_str(),
                    order.amount.to_string(),
                    order.price.to_string(),
                    order.stop_price.map(|p| p.to_string()),
                    order.symbol,
                    order.order_type.as_str(),
                    order.parent_order_id,
                    now,
                ],
            )?;
            tx.commit()?;
        }

        debug!(order_id = %order.order_id, strategy_id = order.strategy_id, "Order saved");
        self.get_order(&order.order_id)?.ok_or_else(|| {
            StoreError::Corrupt(format!("order {} missing after insert", order.order_id))
        })
    }

    fn update_order(&self, order_id: &str, update: &OrderUpdate) -> StoreResult<Option<Order>> {
        let changed = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let changed = tx.execute(
                r#"
                UPDATE orders SET
                    status = COALESCE(?2, status),
                    executed_amount = COALESCE(?3, executed_amount),
                    updated_at = ?4
                WHERE order_id = ?1
                "#,
                params![
                    order_id,
                    update.status.map(|s| s.as_str()),
                    update.executed_amount.map(|a| a.to_string()),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            tx.commit()?;
            changed
        };

        if changed == 0 {
            return Ok(None);
        }
        self.get_order(order_id)
    }

    fn get_order(&self, order_id: &str) -> StoreResult<Option<Order>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?1"),
                [order_id],
                OrderRow::read,
            )
            .optional()?;
        row.map(OrderRow::into_order).transpose()
    }

    fn get_orders_for_strategy(&self, strategy_id: i64) -> StoreResult<Vec<Order>> {
        self.query_orders(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE strategy_id = ?1 ORDER BY id"),
            [strategy_id],
        )
    }

    fn get_orders_by_parent_id(&self, parent_order_id: &str) -> StoreResult<Vec<Order>> {
        self.query_orders(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE parent_order_id = ?1 ORDER BY id"),
            [parent_order_id],
        )
    }

    fn record_fill_profit(&self, strategy: &Strategy, order_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let flagged = tx.execute(
            "UPDATE orders SET profit_recorded = 1, updated_at = ?2 \
             WHERE order_id = ?1 AND profit_recorded = 0",
            params![order_id, Utc::now().to_rfc3339()],
        )?;
        if flagged == 0 {
            // Dropping the transaction rolls it back
            return Ok(false);
        }

        tx.execute(
            r#"
            UPDATE strategies SET
                total_profit = ?2,
                realized_profit = ?3,
                tax_reserve = ?4,
                available_profit = ?5,
                updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                strategy.id,
                strategy.total_profit.to_string(),
                strategy.realized_profit.to_string(),
                strategy.tax_reserve.to_string(),
                strategy.available_profit.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{OrderKind, OrderSide, OrderStatus, StrategyKind};
    use rust_decimal_macros::dec;

    fn new_strategy(name: &str) -> NewStrategy {
        let mut config = StrategyConfig::new();
        config.insert("support_price".into(), "0.30".into());
        config.insert("resistance_price".into(), "0.35".into());
        NewStrategy {
            name: name.to_string(),
            kind: StrategyKind::Range,
            symbol: "dogeusd".to_string(),
            config,
            state: StrategyState::Active,
            check_interval: 60,
        }
    }

    fn new_order(strategy_id: i64, order_id: &str, side: OrderSide) -> NewOrder {
        NewOrder {
            order_id: order_id.to_string(),
            strategy_id,
            status: OrderStatus::Accepted,
            side,
            amount: dec!(1000),
            price: dec!(0.30),
            stop_price: None,
            symbol: "dogeusd".to_string(),
            order_type: OrderKind::limit(side),
            parent_order_id: None,
        }
    }

    #[test]
    fn test_save_and_load_strategy() {
        let store = SqliteStore::in_memory().unwrap();
        let saved = store.save_strategy(&new_strategy("doge range")).unwrap();

        assert!(saved.id > 0);
        assert!(saved.is_active);
        assert_eq!(saved.last_checked_at, None);
        assert_eq!(saved.config["support_price"], "0.30");
        assert_eq!(saved.total_profit, Decimal::ZERO);

        let loaded = store.get_strategy(saved.id).unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_latest_record_wins_by_name() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.save_strategy(&new_strategy("doge")).unwrap();
        let second = store.save_strategy(&new_strategy("doge")).unwrap();
        assert!(second.id > first.id);

        let found = store.get_strategy_by_name("doge").unwrap().unwrap();
        assert_eq!(found.id, second.id);
        assert!(store.get_strategy_by_name("shib").unwrap().is_none());
    }

    #[test]
    fn test_active_query_excludes_terminal_and_inactive() {
        let store = SqliteStore::in_memory().unwrap();
        let active = store.save_strategy(&new_strategy("a")).unwrap();
        let mut done = store.save_strategy(&new_strategy("b")).unwrap();
        let mut paused = store.save_strategy(&new_strategy("c")).unwrap();

        done.state = StrategyState::Completed;
        done.is_active = true;
        store.update_strategy(&done).unwrap();

        paused.transition(StrategyState::Paused).unwrap();
        store.update_strategy(&paused).unwrap();

        let ids: Vec<i64> = store
            .get_active_strategies()
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![active.id]);
    }

    #[test]
    fn test_order_update_and_parent_lookup() {
        let store = SqliteStore::in_memory().unwrap();
        let strategy = store.save_strategy(&new_strategy("doge")).unwrap();
        store
            .save_order(&new_order(strategy.id, "100", OrderSide::Buy))
            .unwrap();

        let mut sell = new_order(strategy.id, "101", OrderSide::Sell);
        sell.parent_order_id = Some("100".to_string());
        store.save_order(&sell).unwrap();

        let updated = store
            .update_order(
                "100",
                &OrderUpdate {
                    status: Some(OrderStatus::Filled),
                    executed_amount: Some(dec!(1000)),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Filled);
        assert_eq!(updated.executed_amount, dec!(1000));
        assert_eq!(updated.price, dec!(0.30));

        let children = store.get_orders_by_parent_id("100").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].order_id, "101");

        assert!(store
            .update_order("missing", &OrderUpdate::default())
            .unwrap()
            .is_none());
        assert_eq!(store.get_orders_for_strategy(strategy.id).unwrap().len(), 2);
    }

    #[test]
    fn test_record_fill_profit_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let mut strategy = store.save_strategy(&new_strategy("doge")).unwrap();
        store
            .save_order(&new_order(strategy.id, "7", OrderSide::Sell))
            .unwrap();

        strategy.total_profit = dec!(50);
        strategy.realized_profit = dec!(50);
        strategy.tax_reserve = dec!(25);
        strategy.available_profit = dec!(25);
        assert!(store.record_fill_profit(&strategy, "7").unwrap());

        strategy.total_profit = dec!(100);
        assert!(!store.record_fill_profit(&strategy, "7").unwrap());

        let loaded = store.get_strategy(strategy.id).unwrap().unwrap();
        assert_eq!(loaded.total_profit, dec!(50));
        assert_eq!(loaded.available_profit, dec!(25));
        assert!(store.get_order("7").unwrap().unwrap().profit_recorded);
    }

    #[test]
    fn test_settling_strategies() {
        let store = SqliteStore::in_memory().unwrap();
        let mut strategy = store.save_strategy(&new_strategy("doge")).unwrap();
        store
            .save_order(&new_order(strategy.id, "9", OrderSide::Sell))
            .unwrap();
        assert!(store.get_settling_strategies().unwrap().is_empty());

        strategy.transition(StrategyState::Completed).unwrap();
        store.update_strategy(&strategy).unwrap();
        assert_eq!(store.get_settling_strategies().unwrap().len(), 1);

        // Filled but not yet credited still needs settling
        store
            .update_order(
                "9",
                &OrderUpdate {
                    status: Some(OrderStatus::Filled),
                    executed_amount: Some(dec!(1000)),
                },
            )
            .unwrap();
        assert_eq!(store.get_settling_strategies().unwrap().len(), 1);

        assert!(store.record_fill_profit(&strategy, "9").unwrap());
        assert!(store.get_settling_strategies().unwrap().is_empty());
    }

    #[test]
    fn test_touch_strategy() {
        let store = SqliteStore::in_memory().unwrap();
        let strategy = store.save_strategy(&new_strategy("doge")).unwrap();
        let now = Utc::now();
        store.touch_strategy(strategy.id, now).unwrap();

        let loaded = store.get_strategy(strategy.id).unwrap().unwrap();
        assert_eq!(loaded.last_checked_at, Some(now));
    }
}
