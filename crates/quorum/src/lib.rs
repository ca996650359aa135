//! Quorum - a multi-analyst trading-day simulator.
//!
//! Four LLM-backed analysts produce independent signals, talk through their
//! disagreements, revise, and hand the result to a portfolio manager, one
//! trading day at a time under a real or virtual clock.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use quorum::core::QuorumConfig;
//! use quorum::store::DayStore;
//! use quorum::{build_orchestrator, run_range};
//! ```

pub mod calendar;
pub mod day_cycle;
pub mod error;
pub mod market;
pub mod runner;

pub use quorum_agents as agents;
pub use quorum_core as core;
pub use quorum_store as store;

pub use calendar::TradingCalendar;
pub use day_cycle::{DayCycleOrchestrator, DayOutcome};
pub use error::CycleError;
pub use market::{FixedPriceFeed, PriceFeed, StoredPriceFeed};
pub use runner::{run_range, RunSummary};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quorum_agents::{
    Analyst, ClaudeCli, LlmAnalyst, LlmPortfolioManager, RulePortfolioManager, StoredMetricTool,
};
use quorum_core::{Clock, ClockKind, DecisionMode, QuorumConfig, SystemClock, VirtualClock};
use quorum_store::{DayStore, MetricDb, MetricReader, SqliteMemoryBackend};

/// The clock a run is configured for. A virtual clock starts at the first
/// day's pre-market.
pub fn build_clock(config: &QuorumConfig) -> Result<Arc<dyn Clock>, CycleError> {
    Ok(match config.run.clock {
        ClockKind::System => Arc::new(SystemClock),
        ClockKind::Virtual => {
            let calendar = TradingCalendar::new(&config.market)?;
            Arc::new(VirtualClock::starting_at(
                calendar.pre_market_at(config.run.start_date)?,
            ))
        }
    })
}

pub fn open_day_store(config: &QuorumConfig) -> Result<DayStore, anyhow::Error> {
    DayStore::new(&config.run.data_dir, &config.run.name)
        .with_context(|| format!("Invalid run name: {}", config.run.name))
}

/// Build a day-cycle orchestrator from configuration: Claude-backed analysts
/// over the metric store, per-agent long-term memory under the run directory.
pub fn build_orchestrator(
    config: &QuorumConfig,
    store: &DayStore,
) -> Result<DayCycleOrchestrator, anyhow::Error> {
    let db = MetricDb::open(&config.store.metrics_path)
        .with_context(|| format!("Failed to open metric store: {}", config.store.metrics_path))?;
    let reader = Arc::new(MetricReader::new(
        db,
        config.store.hot_cache_capacity,
        Duration::from_secs(config.store.hot_cache_ttl_seconds),
    ));

    let llm_timeout = Duration::from_secs(config.agents.llm_timeout_seconds);
    let analysts: Vec<Arc<dyn Analyst>> = config
        .agents
        .enabled_analysts()
        .map(|a| {
            let model = a.model.clone().unwrap_or_else(|| config.agents.model.clone());
            Arc::new(LlmAnalyst::new(
                a.id.clone(),
                a.role,
                Arc::new(ClaudeCli::new(model, llm_timeout)),
                StoredMetricTool::for_role(a.role, &reader),
            )) as Arc<dyn Analyst>
        })
        .collect();

    let clock = build_clock(config)?;
    let prices = Arc::new(StoredPriceFeed::new(Arc::clone(&reader)));
    let memory = Arc::new(SqliteMemoryBackend::open(store.memory_root()));

    let mut orchestrator =
        DayCycleOrchestrator::new(config, clock, analysts, prices)?.with_memory(memory);
    if config.agents.decision == DecisionMode::Llm {
        orchestrator = orchestrator.with_portfolio_manager(Box::new(LlmPortfolioManager::new(
            Arc::new(ClaudeCli::new(config.agents.decision_model.clone(), llm_timeout)),
            RulePortfolioManager::new(config.portfolio.order_quantity),
        )));
    }
    Ok(orchestrator)
}
