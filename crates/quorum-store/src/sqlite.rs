use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::error::StoreError;

/// Schema of the metric database. An external pipeline fills it with
/// pre-computed analysis tool outputs and daily closes; the run only reads.
pub const METRIC_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS tool_metrics (
    role        TEXT NOT NULL,
    ticker      TEXT NOT NULL,
    as_of       TEXT NOT NULL,
    tool        TEXT NOT NULL,
    metric      TEXT NOT NULL,
    score       REAL NOT NULL,
    rationale   TEXT NOT NULL,
    PRIMARY KEY (role, ticker, as_of, tool)
);
CREATE TABLE IF NOT EXISTS daily_prices (
    ticker      TEXT NOT NULL,
    as_of       TEXT NOT NULL,
    close       TEXT NOT NULL,
    PRIMARY KEY (ticker, as_of)
);
CREATE INDEX IF NOT EXISTS idx_metrics_ticker ON tool_metrics(ticker, as_of);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One stored tool output.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub role: String,
    pub ticker: String,
    pub as_of: NaiveDate,
    pub tool: String,
    pub metric: String,
    pub score: f64,
    pub rationale: String,
}

/// SQLite accessor for the metric database.
pub struct MetricDb {
    conn: Connection,
}

impl MetricDb {
    /// Open a read-only connection to an existing metric database.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Open (and create if needed) a writable database, for loading data.
    pub fn create(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(METRIC_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database with the schema. Writable so tests can seed data.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(METRIC_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// All tool outputs for one analyst role, ticker and date, ordered by tool name.
    pub fn metrics_for(
        &self,
        role: &str,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<MetricRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT role, ticker, as_of, tool, metric, score, rationale \
             FROM tool_metrics WHERE role = ?1 AND ticker = ?2 AND as_of = ?3 \
             ORDER BY tool",
        )?;

        let rows = stmt
            .query_map(
                rusqlite::params![role, ticker, as_of.format(DATE_FORMAT).to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(role, ticker, as_of, tool, metric, score, rationale)| {
                Ok(MetricRow {
                    role,
                    ticker,
                    as_of: parse_date(&as_of)?,
                    tool,
                    metric,
                    score,
                    rationale,
                })
            })
            .collect()
    }

    /// Close price for a ticker on a date, if recorded.
    pub fn close_price(
        &self,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<Option<Decimal>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT close FROM daily_prices WHERE ticker = ?1 AND as_of = ?2")?;

        let result = stmt.query_row(
            rusqlite::params![ticker, as_of.format(DATE_FORMAT).to_string()],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(raw) => Decimal::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("close for {ticker} on {as_of}: {e}"))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn insert_metric(&self, row: &MetricRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO tool_metrics \
             (role, ticker, as_of, tool, metric, score, rationale) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                row.role,
                row.ticker,
                row.as_of.format(DATE_FORMAT).to_string(),
                row.tool,
                row.metric,
                row.score,
                row.rationale,
            ],
        )?;
        Ok(())
    }

    pub fn insert_price(
        &self,
        ticker: &str,
        as_of: NaiveDate,
        close: Decimal,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO daily_prices (ticker, as_of, close) VALUES (?1, ?2, ?3)",
            rusqlite::params![ticker, as_of.format(DATE_FORMAT).to_string(), close.to_string()],
        )?;
        Ok(())
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("date {raw}: {e}")))
}
