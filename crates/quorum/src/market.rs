use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use quorum_store::{MetricReader, StoreError};
use rust_decimal::Decimal;

/// Daily close prices for execution and marking.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn close_price(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, StoreError>;
}

/// Close prices from the metric store.
pub struct StoredPriceFeed {
    reader: Arc<MetricReader>,
}

impl StoredPriceFeed {
    pub fn new(reader: Arc<MetricReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl PriceFeed for StoredPriceFeed {
    async fn close_price(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, StoreError> {
        self.reader.close_price(ticker, date)
    }
}

/// Fixed prices, the same every day.
#[derive(Debug, Clone, Default)]
pub struct FixedPriceFeed {
    prices: BTreeMap<String, Decimal>,
}

impl FixedPriceFeed {
    pub fn new(prices: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self {
            prices: prices.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PriceFeed for FixedPriceFeed {
    async fn close_price(
        &self,
        ticker: &str,
        _date: NaiveDate,
    ) -> Result<Option<Decimal>, StoreError> {
        Ok(self.prices.get(ticker).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_store::MetricDb;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn stored_feed_reads_closes() {
        let db = MetricDb::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        db.insert_price("AAPL", date, dec!(243.85)).unwrap();
        let reader = MetricReader::new(db, 10, Duration::from_secs(60));
        let feed = StoredPriceFeed::new(Arc::new(reader));

        assert_eq!(feed.close_price("AAPL", date).await.unwrap(), Some(dec!(243.85)));
        assert_eq!(feed.close_price("MSFT", date).await.unwrap(), None);
    }
}
