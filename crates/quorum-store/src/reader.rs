use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use quorum_core::ToolOutput;
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::memory::HotCache;
use crate::sqlite::MetricDb;

/// Read-through metric access: moka (hot) → SQLite → empty.
///
/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct MetricReader {
    memory: HotCache<Arc<Vec<ToolOutput>>>,
    sqlite: Mutex<MetricDb>,
}

impl MetricReader {
    pub fn new(db: MetricDb, max_capacity: u64, memory_ttl: Duration) -> Self {
        Self {
            memory: HotCache::new(max_capacity, memory_ttl),
            sqlite: Mutex::new(db),
        }
    }

    fn cache_key(role: &str, ticker: &str, as_of: NaiveDate) -> String {
        format!("metrics:{role}:{ticker}:{as_of}")
    }

    /// Tool outputs recorded for a role/ticker/date. Promotes SQLite hits to moka.
    pub async fn tool_outputs(
        &self,
        role: &str,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<Arc<Vec<ToolOutput>>, StoreError> {
        let key = Self::cache_key(role, ticker, as_of);
        if let Some(hit) = self.memory.get(&key).await {
            return Ok(hit);
        }

        let rows = {
            let db = self
                .sqlite
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            db.metrics_for(role, ticker, as_of)?
        };

        let outputs: Arc<Vec<ToolOutput>> = Arc::new(
            rows.into_iter()
                .map(|row| ToolOutput {
                    tool: row.tool,
                    metric: row.metric,
                    score: row.score,
                    rationale: row.rationale,
                })
                .collect(),
        );

        if !outputs.is_empty() {
            self.memory.insert(key, Arc::clone(&outputs)).await;
        }
        Ok(outputs)
    }

    pub fn close_price(
        &self,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<Option<Decimal>, StoreError> {
        let db = self
            .sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
        db.close_price(ticker, as_of)
    }

    /// Number of entries in the hot cache.
    pub fn hot_cache_size(&self) -> u64 {
        self.memory.entry_count()
    }
}
