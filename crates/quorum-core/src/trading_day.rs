use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signal::{PartialFailure, SignalRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    Closed,
    NonTrading,
}

/// States of one trading-day traversal, in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DayPhase {
    PreMarket,
    Analyzing,
    Communicating,
    Deciding,
    Executing,
    Reflecting,
    Done,
}

impl DayPhase {
    pub fn next(self) -> DayPhase {
        match self {
            DayPhase::PreMarket => DayPhase::Analyzing,
            DayPhase::Analyzing => DayPhase::Communicating,
            DayPhase::Communicating => DayPhase::Deciding,
            DayPhase::Deciding => DayPhase::Executing,
            DayPhase::Executing => DayPhase::Reflecting,
            DayPhase::Reflecting | DayPhase::Done => DayPhase::Done,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayPhase::PreMarket => "pre_market",
            DayPhase::Analyzing => "analyzing",
            DayPhase::Communicating => "communicating",
            DayPhase::Deciding => "deciding",
            DayPhase::Executing => "executing",
            DayPhase::Reflecting => "reflecting",
            DayPhase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Long,
    Short,
    Hold,
}

/// A holding. Negative quantity is a short position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub quantity: Decimal,
    pub average_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub margin_used: Decimal,
    pub positions_value: Decimal,
    pub total_value: Decimal,
}

impl PortfolioSnapshot {
    pub fn initial(cash: Decimal) -> Self {
        Self {
            cash,
            margin_used: Decimal::ZERO,
            positions_value: Decimal::ZERO,
            total_value: cash,
        }
    }

    /// Recompute position value and margin from marks. Tickers without a mark
    /// are valued at their average price.
    pub fn revalue(
        cash: Decimal,
        holdings: &BTreeMap<String, Position>,
        marks: &BTreeMap<String, Decimal>,
        margin_requirement: Decimal,
    ) -> Self {
        let mut positions_value = Decimal::ZERO;
        let mut margin_used = Decimal::ZERO;
        for (ticker, position) in holdings {
            let price = marks
                .get(ticker)
                .copied()
                .unwrap_or(position.average_price);
            positions_value += position.quantity * price;
            if position.quantity.is_sign_negative() {
                margin_used += position.quantity.abs() * price * margin_requirement;
            }
        }
        Self {
            cash,
            margin_used,
            positions_value,
            total_value: cash + positions_value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Risk manager output for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub ticker: String,
    pub level: RiskLevel,
    /// Largest position value the portfolio manager may hold in this ticker.
    pub max_position_value: Decimal,
    pub warnings: Vec<String>,
}

/// The day's call for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerDecision {
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub confidence: Decimal,
    pub reasoning: String,
}

/// Everything that happened on one calendar day. Frozen once the day is done;
/// the next day is seeded from it, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingDayState {
    pub date: NaiveDate,
    pub market_status: MarketStatus,
    pub phase: DayPhase,
    pub portfolio: PortfolioSnapshot,
    pub holdings: BTreeMap<String, Position>,
    pub trades: Vec<Trade>,
    /// Every signal record of the day, round 1 and round 2, per ticker.
    pub signals_by_ticker: BTreeMap<String, Vec<SignalRecord>>,
    pub decisions: Vec<TickerDecision>,
    pub risk: BTreeMap<String, RiskAssessment>,
    pub failures: Vec<PartialFailure>,
    /// Set when the day was cancelled; the phase it stopped in.
    pub aborted_at: Option<DayPhase>,
}

impl TradingDayState {
    /// Opening state for `date`, carrying holdings and cash from the prior day.
    pub fn opening(
        date: NaiveDate,
        market_status: MarketStatus,
        prior: Option<&TradingDayState>,
        initial_cash: Decimal,
    ) -> Self {
        let (portfolio, holdings) = match prior {
            Some(prev) => (prev.portfolio.clone(), prev.holdings.clone()),
            None => (PortfolioSnapshot::initial(initial_cash), BTreeMap::new()),
        };
        Self {
            date,
            market_status,
            phase: DayPhase::PreMarket,
            portfolio,
            holdings,
            trades: Vec::new(),
            signals_by_ticker: BTreeMap::new(),
            decisions: Vec::new(),
            risk: BTreeMap::new(),
            failures: Vec::new(),
            aborted_at: None,
        }
    }

    pub fn decision_for(&self, ticker: &str) -> Option<&TickerDecision> {
        self.decisions.iter().find(|d| d.ticker == ticker)
    }

    pub fn is_complete(&self) -> bool {
        self.phase == DayPhase::Done && self.aborted_at.is_none()
    }
}
