// src/infrastructure/persistence/mod.rs
// SQLite-backed trade/order/event store. Events are append-only; order
// status transitions and their event land in one transaction.

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;

use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use crate::domain::models::{
    DcaLevel, EventSource, OrderEvent, OrderStatus, Trade, TradeOrder, TradeStatus,
};
use crate::domain::repository::{FillUpdate, IdempotencyHit, TradeRepository};

pub struct SqliteTradeStore {
    conn: Mutex<Connection>,
}

impl SqliteTradeStore {
    pub fn open(path: &str) -> ExecutionResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> ExecutionResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> ExecutionResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                status TEXT NOT NULL,
                platform TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                stop_loss_price TEXT,
                take_profit_price TEXT,
                quantity TEXT NOT NULL,
                total_invested TEXT NOT NULL,
                client_order_id TEXT NOT NULL UNIQUE,
                signal_id TEXT,
                source_mode TEXT NOT NULL,
                managed_by_bot INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS trade_orders (
                id TEXT PRIMARY KEY,
                trade_id TEXT NOT NULL REFERENCES trades(id),
                order_type TEXT NOT NULL,
                order_level INTEGER NOT NULL,
                platform_order_id TEXT,
                client_order_id TEXT NOT NULL,
                price TEXT,
                quantity TEXT NOT NULL,
                filled_quantity TEXT NOT NULL,
                average_fill_price TEXT,
                fees TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trade_orders_trade ON trade_orders(trade_id);
            CREATE INDEX IF NOT EXISTS idx_trade_orders_client ON trade_orders(client_order_id);
            CREATE TABLE IF NOT EXISTS order_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT NOT NULL,
                order_id TEXT,
                event_type TEXT NOT NULL,
                previous_status TEXT,
                new_status TEXT,
                source TEXT NOT NULL,
                event_data TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_order_events_trade ON order_events(trade_id);
            CREATE TABLE IF NOT EXISTS dca_orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                level INTEGER NOT NULL,
                target_price TEXT NOT NULL,
                amount TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS auto_trade_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                event_data TEXT,
                created_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn decimal(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap_or(Decimal::ZERO)
    }

    fn opt_decimal(text: Option<String>) -> Option<Decimal> {
        text.and_then(|s| Decimal::from_str(&s).ok())
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<RawOrderRow> {
        Ok(RawOrderRow {
            id: row.get(0)?,
            trade_id: row.get(1)?,
            order_type: row.get(2)?,
            order_level: row.get(3)?,
            platform_order_id: row.get(4)?,
            client_order_id: row.get(5)?,
            price: row.get(6)?,
            quantity: row.get(7)?,
            filled_quantity: row.get(8)?,
            average_fill_price: row.get(9)?,
            fees: row.get(10)?,
            status: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

struct RawOrderRow {
    id: String,
    trade_id: String,
    order_type: String,
    order_level: u32,
    platform_order_id: Option<String>,
    client_order_id: String,
    price: Option<String>,
    quantity: String,
    filled_quantity: String,
    average_fill_price: Option<String>,
    fees: String,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl RawOrderRow {
    fn into_order(self) -> ExecutionResult<TradeOrder> {
        Ok(TradeOrder {
            id: self.id,
            trade_id: self.trade_id,
            order_type: self.order_type.parse()?,
            level: self.order_level,
            platform_order_id: self.platform_order_id,
            client_order_id: self.client_order_id,
            price: SqliteTradeStore::opt_decimal(self.price),
            quantity: SqliteTradeStore::decimal(&self.quantity),
            filled_quantity: SqliteTradeStore::decimal(&self.filled_quantity),
            average_fill_price: SqliteTradeStore::opt_decimal(self.average_fill_price),
            fees: SqliteTradeStore::decimal(&self.fees),
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, trade_id, order_type, order_level, platform_order_id, \
     client_order_id, price, quantity, filled_quantity, average_fill_price, fees, status, \
     created_at, updated_at";

#[allow(clippy::too_many_arguments)]
fn append_event(
    conn: &Connection,
    trade_id: &str,
    order_id: Option<&str>,
    event_type: &str,
    previous: Option<OrderStatus>,
    new: Option<OrderStatus>,
    source: EventSource,
    data: Option<&Value>,
) -> ExecutionResult<()> {
    conn.execute(
        "INSERT INTO order_events
            (trade_id, order_id, event_type, previous_status, new_status, source, event_data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            trade_id,
            order_id,
            event_type,
            previous.map(|s| s.as_str()),
            new.map(|s| s.as_str()),
            source.as_str(),
            data.map(|d| d.to_string()),
            Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(())
}

impl TradeRepository for SqliteTradeStore {
    fn create_trade(&self, trade: &Trade) -> ExecutionResult<()> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO trades
                (id, user_id, symbol, side, leverage, status, platform, entry_price,
                 stop_loss_price, take_profit_price, quantity, total_invested,
                 client_order_id, signal_id, source_mode, managed_by_bot, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                trade.id,
                trade.user_id,
                trade.symbol,
                trade.side.as_str(),
                trade.leverage,
                trade.status.as_str(),
                trade.platform.as_str(),
                trade.entry_price.to_string(),
                trade.stop_loss_price.map(|p| p.to_string()),
                trade.take_profit_price.map(|p| p.to_string()),
                trade.quantity.to_string(),
                trade.total_invested.to_string(),
                trade.client_order_id,
                trade.signal_id,
                trade.source_mode.as_str(),
                trade.managed_by_bot as i64,
                trade.created_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("UNIQUE constraint failed: trades.client_order_id") => {
                Err(ExecutionError::with_message(
                    ErrorKind::DuplicateOrder,
                    format!("client order id {} already submitted", trade.client_order_id),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_trade_status(&self, trade_id: &str, status: TradeStatus) -> ExecutionResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE trades SET status = ?1 WHERE id = ?2",
            params![status.as_str(), trade_id],
        )?;
        if changed == 0 {
            return Err(ExecutionError::with_message(
                ErrorKind::DatabaseError,
                format!("trade {} not found", trade_id),
            ));
        }
        Ok(())
    }

    fn find_by_client_order_id(
        &self,
        user_id: &str,
        client_order_id: &str,
    ) -> ExecutionResult<Option<IdempotencyHit>> {
        let conn = self.conn.lock().unwrap();

        let trade_hit: Option<String> = conn
            .query_row(
                "SELECT id FROM trades WHERE user_id = ?1 AND client_order_id = ?2",
                params![user_id, client_order_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(trade_id) = trade_hit {
            return Ok(Some(IdempotencyHit { trade_id, order_id: None }));
        }

        let order_hit: Option<(String, String)> = conn
            .query_row(
                "SELECT o.trade_id, o.id
                 FROM trade_orders o JOIN trades t ON t.id = o.trade_id
                 WHERE t.user_id = ?1
                   AND (o.client_order_id = ?2 OR o.platform_order_id = ?2)",
                params![user_id, client_order_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(order_hit.map(|(trade_id, order_id)| IdempotencyHit {
            trade_id,
            order_id: Some(order_id),
        }))
    }

    fn create_order(&self, order: &TradeOrder) -> ExecutionResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO trade_orders
                (id, trade_id, order_type, order_level, platform_order_id, client_order_id,
                 price, quantity, filled_quantity, average_fill_price, fees, status,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                order.id,
                order.trade_id,
                order.order_type.as_str(),
                order.level,
                order.platform_order_id,
                order.client_order_id,
                order.price.map(|p| p.to_string()),
                order.quantity.to_string(),
                order.filled_quantity.to_string(),
                order.average_fill_price.map(|p| p.to_string()),
                order.fees.to_string(),
                order.status.as_str(),
                order.created_at,
                order.updated_at,
            ],
        )?;
        append_event(
            &tx,
            &order.trade_id,
            Some(&order.id),
            "CREATED",
            None,
            Some(order.status),
            EventSource::System,
            None,
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        error_message: Option<&str>,
        source: EventSource,
    ) -> ExecutionResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (trade_id, current_raw): (String, String) = tx
            .query_row(
                "SELECT trade_id, status FROM trade_orders WHERE id = ?1",
                params![order_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::DatabaseError,
                    format!("order {} not found", order_id),
                )
            })?;
        let current: OrderStatus = current_raw.parse()?;

        if !current.can_transition_to(new_status) {
            return Err(ExecutionError::with_message(
                ErrorKind::ValidationError,
                format!(
                    "illegal order transition {} -> {}",
                    current.as_str(),
                    new_status.as_str()
                ),
            ));
        }

        tx.execute(
            "UPDATE trade_orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_status.as_str(), Utc::now().timestamp_millis(), order_id],
        )?;
        let data = error_message.map(|m| serde_json::json!({ "error": m }));
        append_event(
            &tx,
            &trade_id,
            Some(order_id),
            new_status.as_str(),
            Some(current),
            Some(new_status),
            source,
            data.as_ref(),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn record_fill(
        &self,
        order_id: &str,
        fill: &FillUpdate,
        source: EventSource,
    ) -> ExecutionResult<OrderStatus> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let row: Option<(String, String, String, Option<String>, String, String)> = tx
            .query_row(
                "SELECT trade_id, quantity, filled_quantity, average_fill_price, fees, status
                 FROM trade_orders WHERE id = ?1",
                params![order_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;
        let (trade_id, quantity_raw, filled_raw, avg_raw, fees_raw, status_raw) =
            row.ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::DatabaseError,
                    format!("order {} not found", order_id),
                )
            })?;

        let current: OrderStatus = status_raw.parse()?;
        let quantity = Self::decimal(&quantity_raw);
        let previously_filled = Self::decimal(&filled_raw);
        let new_filled = previously_filled + fill.quantity;

        let new_status = if new_filled >= quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        if !current.can_transition_to(new_status) {
            return Err(ExecutionError::with_message(
                ErrorKind::PartialFillFailed,
                format!(
                    "illegal fill transition {} -> {}",
                    current.as_str(),
                    new_status.as_str()
                ),
            ));
        }

        // Volume-weighted average across accumulated fills.
        let average = match (fill.price, Self::opt_decimal(avg_raw)) {
            (Some(price), Some(prev)) if new_filled > Decimal::ZERO => {
                Some((prev * previously_filled + price * fill.quantity) / new_filled)
            }
            (Some(price), _) => Some(price),
            (None, prev) => prev,
        };
        let fees = Self::decimal(&fees_raw) + fill.fees;

        tx.execute(
            "UPDATE trade_orders
             SET filled_quantity = ?1, average_fill_price = ?2, fees = ?3, status = ?4,
                 updated_at = ?5
             WHERE id = ?6",
            params![
                new_filled.to_string(),
                average.map(|a| a.to_string()),
                fees.to_string(),
                new_status.as_str(),
                Utc::now().timestamp_millis(),
                order_id,
            ],
        )?;
        append_event(
            &tx,
            &trade_id,
            Some(order_id),
            "FILL",
            Some(current),
            Some(new_status),
            source,
            Some(&serde_json::json!({
                "fill_quantity": fill.quantity.to_string(),
                "fill_price": fill.price.map(|p| p.to_string()),
                "total_filled": new_filled.to_string(),
            })),
        )?;
        tx.commit()?;
        Ok(new_status)
    }

    fn record_dca_order(
        &self,
        trade_id: &str,
        user_id: &str,
        symbol: &str,
        level: &DcaLevel,
        status: &str,
    ) -> ExecutionResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO dca_orders
                (trade_id, user_id, symbol, level, target_price, amount, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trade_id,
                user_id,
                symbol,
                level.level,
                level.target_price.to_string(),
                level.amount.to_string(),
                status,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn append_trade_event(
        &self,
        trade_id: &str,
        event_type: &str,
        source: EventSource,
        data: Option<Value>,
    ) -> ExecutionResult<()> {
        let conn = self.conn.lock().unwrap();
        append_event(&conn, trade_id, None, event_type, None, None, source, data.as_ref())
    }

    fn log_auto_trade(
        &self,
        user_id: Option<&str>,
        category: &str,
        message: &str,
        data: Option<Value>,
    ) -> ExecutionResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auto_trade_logs (user_id, category, message, event_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                category,
                message,
                data.map(|d| d.to_string()),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn get_order(&self, order_id: &str) -> ExecutionResult<Option<TradeOrder>> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM trade_orders WHERE id = ?1", ORDER_COLUMNS),
                params![order_id],
                Self::row_to_order,
            )
            .optional()?;
        raw.map(RawOrderRow::into_order).transpose()
    }

    fn list_events(&self, trade_id: &str) -> ExecutionResult<Vec<OrderEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, trade_id, order_id, event_type, previous_status, new_status, source,
                    event_data, created_at
             FROM order_events WHERE trade_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![trade_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, trade_id, order_id, event_type, prev, new, source, data, created_at) = row?;
            events.push(OrderEvent {
                id,
                trade_id,
                order_id,
                event_type,
                previous_status: prev.map(|s| s.parse()).transpose()?,
                new_status: new.map(|s| s.parse()).transpose()?,
                source: match source.as_str() {
                    "EXCHANGE" => EventSource::Exchange,
                    "USER" => EventSource::User,
                    "RETRY" => EventSource::Retry,
                    "MONITOR" => EventSource::Monitor,
                    _ => EventSource::System,
                },
                data: data.and_then(|d| serde_json::from_str(&d).ok()),
                created_at,
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExchangePlatform, OrderSide, SourceMode, TradeOrderType};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_trade(client_order_id: &str) -> Trade {
        Trade {
            id: Uuid::new_v4().to_string(),
            user_id: "user-1".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            leverage: 1,
            status: TradeStatus::Pending,
            platform: ExchangePlatform::Binance,
            entry_price: dec!(50000),
            stop_loss_price: Some(dec!(48000)),
            take_profit_price: None,
            quantity: dec!(0.002),
            total_invested: dec!(100),
            client_order_id: client_order_id.to_string(),
            signal_id: Some("sig-1".to_string()),
            source_mode: SourceMode::SignalExecution,
            managed_by_bot: true,
            created_at: 1_700_000_000_000,
        }
    }

    fn sample_order(trade_id: &str) -> TradeOrder {
        TradeOrder {
            id: Uuid::new_v4().to_string(),
            trade_id: trade_id.to_string(),
            order_type: TradeOrderType::Entry,
            level: 0,
            platform_order_id: Some("ex-1".to_string()),
            client_order_id: "coid-1".to_string(),
            price: None,
            quantity: dec!(0.002),
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            fees: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn duplicate_client_order_id_is_rejected_as_duplicate() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        store.create_trade(&sample_trade("coid-dup")).unwrap();
        let err = store.create_trade(&sample_trade("coid-dup")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateOrder);
    }

    #[test]
    fn finds_prior_submission_by_trade_client_id() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        let trade = sample_trade("coid-find");
        store.create_trade(&trade).unwrap();

        let hit = store.find_by_client_order_id("user-1", "coid-find").unwrap().unwrap();
        assert_eq!(hit.trade_id, trade.id);
        assert!(hit.order_id.is_none());

        assert!(store.find_by_client_order_id("user-2", "coid-find").unwrap().is_none());
        assert!(store.find_by_client_order_id("user-1", "coid-other").unwrap().is_none());
    }

    #[test]
    fn finds_prior_submission_by_order_ids() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        let trade = sample_trade("coid-parent");
        store.create_trade(&trade).unwrap();
        let order = sample_order(&trade.id);
        store.create_order(&order).unwrap();

        let by_client = store.find_by_client_order_id("user-1", "coid-1").unwrap().unwrap();
        assert_eq!(by_client.order_id.as_deref(), Some(order.id.as_str()));

        let by_platform = store.find_by_client_order_id("user-1", "ex-1").unwrap().unwrap();
        assert_eq!(by_platform.trade_id, trade.id);
    }

    #[test]
    fn order_creation_appends_created_event() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        let trade = sample_trade("coid-ev");
        store.create_trade(&trade).unwrap();
        store.create_order(&sample_order(&trade.id)).unwrap();

        let events = store.list_events(&trade.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "CREATED");
        assert_eq!(events[0].new_status, Some(OrderStatus::Pending));
    }

    #[test]
    fn fills_accumulate_until_filled() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        let trade = sample_trade("coid-fill");
        store.create_trade(&trade).unwrap();
        let order = sample_order(&trade.id);
        store.create_order(&order).unwrap();

        let status = store
            .record_fill(
                &order.id,
                &FillUpdate { quantity: dec!(0.001), price: Some(dec!(50000)), fees: dec!(0.01) },
                EventSource::Exchange,
            )
            .unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);

        let status = store
            .record_fill(
                &order.id,
                &FillUpdate { quantity: dec!(0.001), price: Some(dec!(50100)), fees: dec!(0.01) },
                EventSource::Exchange,
            )
            .unwrap();
        assert_eq!(status, OrderStatus::Filled);

        let stored = store.get_order(&order.id).unwrap().unwrap();
        assert_eq!(stored.filled_quantity, dec!(0.002));
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.average_fill_price, Some(dec!(50050)));
        assert_eq!(stored.fees, dec!(0.02));

        // CREATED + two FILL events, append-only.
        let events = store.list_events(&trade.id).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].event_type, "FILL");
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        let trade = sample_trade("coid-illegal");
        store.create_trade(&trade).unwrap();
        let order = sample_order(&trade.id);
        store.create_order(&order).unwrap();

        store
            .update_order_status(&order.id, OrderStatus::Cancelled, None, EventSource::User)
            .unwrap();
        let err = store
            .update_order_status(&order.id, OrderStatus::Filled, None, EventSource::Exchange)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn failure_transition_records_error_in_event() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        let trade = sample_trade("coid-failev");
        store.create_trade(&trade).unwrap();
        let order = sample_order(&trade.id);
        store.create_order(&order).unwrap();

        store
            .update_order_status(
                &order.id,
                OrderStatus::Failed,
                Some("exchange rejected"),
                EventSource::Exchange,
            )
            .unwrap();

        let events = store.list_events(&trade.id).unwrap();
        let failure = events.last().unwrap();
        assert_eq!(failure.event_type, "FAILED");
        assert_eq!(failure.previous_status, Some(OrderStatus::Pending));
        assert!(failure.data.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("rejected"));
    }

    #[test]
    fn trade_status_update_and_logs() {
        let store = SqliteTradeStore::open_in_memory().unwrap();
        let trade = sample_trade("coid-status");
        store.create_trade(&trade).unwrap();
        store.update_trade_status(&trade.id, TradeStatus::Active).unwrap();
        assert!(store.update_trade_status("missing", TradeStatus::Failed).is_err());

        store
            .log_auto_trade(Some("user-1"), "guard_denied", "kill switch", None)
            .unwrap();
        store
            .record_dca_order(
                &trade.id,
                "user-1",
                "BTC/USDT",
                &DcaLevel { level: 1, target_price: dec!(48000), amount: dec!(50) },
                "PLACED",
            )
            .unwrap();
    }
}
