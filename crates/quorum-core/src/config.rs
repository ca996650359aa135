use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_message::AnalystRole;
use crate::clock::ClockKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuorumConfig {
    pub run: RunConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub communication: CommunicationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl QuorumConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.name.trim().is_empty() {
            return Err(ConfigError("run.name must not be empty".to_string()));
        }
        if self.run.tickers.is_empty() {
            return Err(ConfigError("run.tickers must not be empty".to_string()));
        }
        if self.run.end_date < self.run.start_date {
            return Err(ConfigError(format!(
                "run.end_date {} is before run.start_date {}",
                self.run.end_date, self.run.start_date
            )));
        }
        if self.market.close <= self.market.open {
            return Err(ConfigError(
                "market.close must be after market.open".to_string(),
            ));
        }
        if !(-23..=23).contains(&self.market.utc_offset_hours) {
            return Err(ConfigError(format!(
                "market.utc_offset_hours out of range: {}",
                self.market.utc_offset_hours
            )));
        }
        if self.notifications.retention_days < 0 {
            return Err(ConfigError(format!(
                "notifications.retention_days must be >= 0, got {}",
                self.notifications.retention_days
            )));
        }
        if self.agents.max_workers == 0 {
            return Err(ConfigError("agents.max_workers must be >= 1".to_string()));
        }
        let mut seen = HashSet::new();
        for analyst in &self.agents.analysts {
            if !seen.insert(analyst.id.as_str()) {
                return Err(ConfigError(format!("duplicate analyst id: {}", analyst.id)));
            }
        }
        if self.agents.enabled_analysts().next().is_none() {
            return Err(ConfigError("no analysts enabled".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Produce signals and decisions only.
    #[default]
    Signal,
    /// Also execute decisions against a simulated portfolio.
    Portfolio,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Run name; addresses the persisted state directory.
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_clock")]
    pub clock: ClockKind,
    /// Opaque key/value context passed through to round-2 analysts.
    #[serde(default)]
    pub pipeline_context: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    #[default]
    Concurrent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    /// Confidence-weighted vote.
    #[default]
    Rules,
    /// Language-model portfolio manager, falling back to the vote.
    Llm,
}

/// Configuration for the analyst team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentsConfig {
    /// Default model for analysts.
    #[serde(default = "default_analyst_model")]
    pub model: String,
    /// Model for the portfolio manager when `decision = "llm"`.
    #[serde(default = "default_decision_model")]
    pub decision_model: String,
    /// Deadline for a single analyst's whole round.
    #[serde(default = "default_analyst_timeout")]
    pub analyst_timeout_seconds: u64,
    /// Deadline for a single language-model call.
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_seconds: u64,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub decision: DecisionMode,
    /// Snippets recalled from long-term memory per prompt.
    #[serde(default = "default_memory_top_k")]
    pub memory_top_k: usize,
    #[serde(default = "default_analysts")]
    pub analysts: Vec<AnalystConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            model: default_analyst_model(),
            decision_model: default_decision_model(),
            analyst_timeout_seconds: default_analyst_timeout(),
            llm_timeout_seconds: default_llm_timeout(),
            execution: ExecutionMode::default(),
            max_workers: default_max_workers(),
            decision: DecisionMode::default(),
            memory_top_k: default_memory_top_k(),
            analysts: default_analysts(),
        }
    }
}

impl AgentsConfig {
    pub fn enabled_analysts(&self) -> impl Iterator<Item = &AnalystConfig> {
        self.analysts.iter().filter(|a| a.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystConfig {
    pub id: String,
    pub role: AnalystRole,
    /// Overrides `AgentsConfig::model`.
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cycles per session; 0 disables communication and round 2.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Confidence spread (0-100) between analysts that triggers a session.
    #[serde(default = "default_disagreement_spread")]
    pub disagreement_spread: Decimal,
    /// Window for "recent" notifications seeded into sessions.
    #[serde(default = "default_recent_window")]
    pub recent_window_seconds: u64,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cycles: default_max_cycles(),
            max_sessions: default_max_sessions(),
            disagreement_spread: default_disagreement_spread(),
            recent_window_seconds: default_recent_window(),
        }
    }
}

impl CommunicationConfig {
    /// Whether communication, and therefore round 2, runs at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.max_cycles > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioConfig {
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    /// Fraction of short notional reserved from cash.
    #[serde(default = "default_margin_requirement")]
    pub margin_requirement: Decimal,
    /// Largest share of total value one ticker may take.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: Decimal,
    /// Shares per long/short decision before risk limits.
    #[serde(default = "default_order_quantity")]
    pub order_quantity: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            margin_requirement: default_margin_requirement(),
            max_position_pct: default_max_position_pct(),
            order_quantity: default_order_quantity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketConfig {
    #[serde(default = "default_open")]
    pub open: NaiveTime,
    #[serde(default = "default_close")]
    pub close: NaiveTime,
    /// Fixed offset of the exchange's local time from UTC.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            open: default_open(),
            close: default_close(),
            utc_offset_hours: default_utc_offset(),
            holidays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// SQLite file with pre-computed tool metrics and close prices.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    #[serde(default = "default_hot_capacity")]
    pub hot_cache_capacity: u64,
    #[serde(default = "default_hot_ttl")]
    pub hot_cache_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            metrics_path: default_metrics_path(),
            hot_cache_capacity: default_hot_capacity(),
            hot_cache_ttl_seconds: default_hot_ttl(),
        }
    }
}

fn default_data_dir() -> String {
    "data/runs".to_string()
}
fn default_clock() -> ClockKind {
    ClockKind::Virtual
}
fn default_analyst_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_decision_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_analyst_timeout() -> u64 {
    120
}
fn default_llm_timeout() -> u64 {
    45
}
fn default_max_workers() -> usize {
    4
}
fn default_memory_top_k() -> usize {
    3
}
fn default_analysts() -> Vec<AnalystConfig> {
    AnalystRole::ALL
        .iter()
        .map(|role| AnalystConfig {
            id: role.default_agent_id(),
            role: *role,
            model: None,
            enabled: true,
        })
        .collect()
}
fn default_true() -> bool {
    true
}
fn default_max_cycles() -> u32 {
    2
}
fn default_max_sessions() -> usize {
    4
}
fn default_disagreement_spread() -> Decimal {
    Decimal::from(30)
}
fn default_recent_window() -> u64 {
    86_400
}
fn default_retention_days() -> i64 {
    7
}
fn default_initial_cash() -> Decimal {
    Decimal::from(100_000)
}
fn default_margin_requirement() -> Decimal {
    Decimal::new(5, 1)
}
fn default_max_position_pct() -> Decimal {
    Decimal::new(25, 2)
}
fn default_order_quantity() -> Decimal {
    Decimal::from(100)
}
fn default_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN)
}
fn default_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN)
}
fn default_utc_offset() -> i32 {
    -5
}
fn default_metrics_path() -> String {
    "data/metrics.db".to_string()
}
fn default_hot_capacity() -> u64 {
    10_000
}
fn default_hot_ttl() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
[run]
name = "smoke"
tickers = ["AAPL", "MSFT"]
start_date = "2025-01-06"
end_date = "2025-01-10"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: QuorumConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.run.mode, RunMode::Signal);
        assert_eq!(config.run.clock, ClockKind::Virtual);
        assert_eq!(config.agents.analysts.len(), 4);
        assert_eq!(config.communication.max_cycles, 2);
        assert_eq!(config.notifications.retention_days, 7);
        assert_eq!(config.portfolio.margin_requirement, dec!(0.5));
        assert_eq!(config.market.open, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        config.validate().unwrap();
    }

    #[test]
    fn full_config_from_toml() {
        let toml_str = r#"
[run]
name = "jan"
data_dir = "/tmp/quorum"
tickers = ["AAPL"]
start_date = "2025-01-06"
end_date = "2025-01-06"
mode = "portfolio"
clock = "system"

[run.pipeline_context]
market_outlook = "risk-off"

[agents]
execution = "sequential"
max_workers = 2
decision = "llm"

[[agents.analysts]]
id = "fundamentals_analyst"
role = "fundamentals"

[[agents.analysts]]
id = "technical_analyst"
role = "technical"
model = "claude-sonnet-4-5-20250929"
enabled = false

[communication]
enabled = true
max_cycles = 0

[portfolio]
initial_cash = "50000"
margin_requirement = "0.25"

[market]
open = "09:30:00"
close = "16:00:00"
utc_offset_hours = -4
holidays = ["2025-01-09"]
"#;
        let config: QuorumConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.mode, RunMode::Portfolio);
        assert_eq!(config.run.clock, ClockKind::System);
        assert_eq!(config.run.pipeline_context["market_outlook"], "risk-off");
        assert_eq!(config.agents.execution, ExecutionMode::Sequential);
        assert_eq!(config.agents.decision, DecisionMode::Llm);
        assert_eq!(config.agents.enabled_analysts().count(), 1);
        assert!(!config.communication.is_active());
        assert_eq!(config.portfolio.initial_cash, dec!(50000));
        assert_eq!(config.market.holidays.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_inverted_dates() {
        let mut config: QuorumConfig = toml::from_str(MINIMAL).unwrap();
        config.run.end_date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_analysts() {
        let mut config: QuorumConfig = toml::from_str(MINIMAL).unwrap();
        let dup = config.agents.analysts[0].clone();
        config.agents.analysts.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.0.contains("duplicate"));
    }

    #[test]
    fn validate_rejects_negative_retention() {
        let mut config: QuorumConfig = toml::from_str(MINIMAL).unwrap();
        config.notifications.retention_days = 0;
        config.validate().unwrap();

        config.notifications.retention_days = -1;
        let err = config.validate().unwrap_err();
        assert!(err.0.contains("retention_days"));
    }

    #[test]
    fn shipped_config_is_valid() {
        let config: QuorumConfig =
            toml::from_str(include_str!("../../../config/quorum.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.agents.enabled_analysts().count(), 4);
        assert_eq!(config.communication.disagreement_spread, dec!(30));
    }

    #[test]
    fn roundtrip_config() {
        let config: QuorumConfig = toml::from_str(MINIMAL).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: QuorumConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
