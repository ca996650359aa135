//! Exchange session boundaries at a fixed UTC offset.

use std::collections::BTreeSet;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use quorum_core::{MarketConfig, MarketStatus};

use crate::error::CycleError;

/// How long before the open the pre-market phase starts.
const PRE_MARKET_LEAD_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    open: NaiveTime,
    close: NaiveTime,
    offset: FixedOffset,
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(config: &MarketConfig) -> Result<Self, CycleError> {
        if config.close <= config.open {
            return Err(CycleError::Calendar(format!(
                "close {} is not after open {}",
                config.close, config.open
            )));
        }
        let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600).ok_or_else(|| {
            CycleError::Calendar(format!("invalid UTC offset: {}h", config.utc_offset_hours))
        })?;
        Ok(Self {
            open: config.open,
            close: config.close,
            offset,
            holidays: config.holidays.iter().copied().collect(),
        })
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, CycleError> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| CycleError::Calendar(format!("no instant for {date} {time}")))
    }

    pub fn open_at(&self, date: NaiveDate) -> Result<DateTime<Utc>, CycleError> {
        self.local_to_utc(date, self.open)
    }

    pub fn close_at(&self, date: NaiveDate) -> Result<DateTime<Utc>, CycleError> {
        self.local_to_utc(date, self.close)
    }

    pub fn pre_market_at(&self, date: NaiveDate) -> Result<DateTime<Utc>, CycleError> {
        Ok(self.open_at(date)? - Duration::minutes(PRE_MARKET_LEAD_MINUTES))
    }

    /// Status of `date`'s session as seen at `now`.
    pub fn status(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<MarketStatus, CycleError> {
        if !self.is_trading_day(date) {
            return Ok(MarketStatus::NonTrading);
        }
        if self.open_at(date)? <= now && now < self.close_at(date)? {
            Ok(MarketStatus::Open)
        } else {
            Ok(MarketStatus::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar() -> TradingCalendar {
        TradingCalendar::new(&MarketConfig {
            holidays: vec![NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()],
            ..Default::default()
        })
        .unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn weekends_and_holidays_do_not_trade() {
        let cal = calendar();
        assert!(cal.is_trading_day(day(6)));
        assert!(!cal.is_trading_day(day(11)));
        assert!(!cal.is_trading_day(day(12)));
        assert!(!cal.is_trading_day(day(20)));
    }

    #[test]
    fn session_boundaries_use_the_offset() {
        let cal = calendar();
        let utc = |h, m| Utc.with_ymd_and_hms(2025, 1, 6, h, m, 0).unwrap();
        assert_eq!(cal.open_at(day(6)).unwrap(), utc(14, 30));
        assert_eq!(cal.close_at(day(6)).unwrap(), utc(21, 0));
        assert_eq!(cal.pre_market_at(day(6)).unwrap(), utc(13, 30));
    }

    #[test]
    fn status_at_instants() {
        let cal = calendar();
        let at = |h, m| Utc.with_ymd_and_hms(2025, 1, 6, h, m, 0).unwrap();
        assert_eq!(cal.status(day(6), at(13, 0)).unwrap(), MarketStatus::Closed);
        assert_eq!(cal.status(day(6), at(14, 30)).unwrap(), MarketStatus::Open);
        assert_eq!(cal.status(day(6), at(21, 0)).unwrap(), MarketStatus::Closed);
        assert_eq!(cal.status(day(11), at(15, 0)).unwrap(), MarketStatus::NonTrading);
    }

    #[test]
    fn rejects_inverted_session() {
        let config = MarketConfig {
            open: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            ..Default::default()
        };
        assert!(matches!(TradingCalendar::new(&config), Err(CycleError::Calendar(_))));
    }
}
