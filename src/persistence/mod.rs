//! SQLite-backed trade store.
//!
//! One row per position. Decimals are stored as TEXT to keep exact
//! precision, timestamps as RFC 3339.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Open,
    Closed,
    ClosedManually,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::ClosedManually => "CLOSED_MANUALLY",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED" => Ok(TradeStatus::Closed),
            "CLOSED_MANUALLY" => Ok(TradeStatus::ClosedManually),
            other => Err(anyhow!("unknown trade status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub id: i64,
    pub pair: String,
    pub order_id: i64,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub status: TradeStatus,
    pub exit_price: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
}

/// Fields required to record a filled entry order.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub pair: String,
    pub order_id: i64,
    pub entry_price: Decimal,
    pub quantity: Decimal,
}

pub struct TradeStore {
    conn: Mutex<Connection>,
}

impl TradeStore {
    pub fn new(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("opening database {path}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(%path, "trade store ready");
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("trade store mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                order_id INTEGER NOT NULL UNIQUE,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                exit_price TEXT,
                profit_loss TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_pair ON trades(pair);
            CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);",
        )?;
        Ok(())
    }

    pub fn create_open_trade(&self, new_trade: &NewTrade) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO trades (pair, order_id, entry_price, quantity, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'OPEN', ?5, ?5)",
            params![
                new_trade.pair,
                new_trade.order_id,
                new_trade.entry_price.to_string(),
                new_trade.quantity.to_string(),
                now,
            ],
        )
        .with_context(|| format!("recording open trade for {}", new_trade.pair))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_open_trades(&self) -> Result<Vec<Trade>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, pair, order_id, entry_price, quantity, status, exit_price, profit_loss
             FROM trades WHERE status = 'OPEN' ORDER BY id",
        )?;
        let trades = stmt
            .query_map([], row_to_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    pub fn open_trade_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE status = 'OPEN'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn find_open_by_pair(&self, pair: &str) -> Result<Option<Trade>> {
        let conn = self.lock()?;
        let trade = conn
            .query_row(
                "SELECT id, pair, order_id, entry_price, quantity, status, exit_price, profit_loss
                 FROM trades WHERE pair = ?1 AND status = 'OPEN' ORDER BY id LIMIT 1",
                params![pair],
                row_to_trade,
            )
            .optional()?;
        Ok(trade)
    }

    /// Close a filled exit, recording the realized profit or loss. Only an
    /// OPEN row transitions; a second call is a no-op.
    pub fn close_trade(&self, id: i64, exit_price: Decimal) -> Result<bool> {
        let conn = self.lock()?;
        let trade = conn
            .query_row(
                "SELECT id, pair, order_id, entry_price, quantity, status, exit_price, profit_loss
                 FROM trades WHERE id = ?1 AND status = 'OPEN'",
                params![id],
                row_to_trade,
            )
            .optional()?;
        let Some(trade) = trade else {
            return Ok(false);
        };

        let profit_loss = (exit_price - trade.entry_price) * trade.quantity;
        let updated = conn.execute(
            "UPDATE trades
             SET status = 'CLOSED', exit_price = ?2, profit_loss = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'OPEN'",
            params![
                id,
                exit_price.to_string(),
                profit_loss.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(updated > 0)
    }

    /// Mark a position closed outside the bot. Matches only OPEN rows, so
    /// replays are no-ops.
    pub fn mark_closed_manually(&self, pair: &str, order_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE trades SET status = 'CLOSED_MANUALLY', updated_at = ?3
             WHERE pair = ?1 AND order_id = ?2 AND status = 'OPEN'",
            params![pair, order_id, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    /// All trades, newest first. Backs the status report.
    pub fn list_all_trades(&self) -> Result<Vec<Trade>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, pair, order_id, entry_price, quantity, status, exit_price, profit_loss
             FROM trades ORDER BY id DESC",
        )?;
        let trades = stmt
            .query_map([], row_to_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }
}

fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<Trade> {
    let parse = |idx: usize, text: String| {
        text.parse::<Decimal>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    };
    let entry_price: String = row.get(3)?;
    let quantity: String = row.get(4)?;
    let status: String = row.get(5)?;
    let exit_price: Option<String> = row.get(6)?;
    let profit_loss: Option<String> = row.get(7)?;

    Ok(Trade {
        id: row.get(0)?,
        pair: row.get(1)?,
        order_id: row.get(2)?,
        entry_price: parse(3, entry_price)?,
        quantity: parse(4, quantity)?,
        status: TradeStatus::parse(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        exit_price: exit_price.map(|p| parse(6, p)).transpose()?,
        profit_loss: profit_loss.map(|p| parse(7, p)).transpose()?,
    })
}
