//! Day-cycle and multi-day runner tests with scripted analysts, fixed prices
//! and a frozen virtual clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use quorum::{run_range, CycleError, DayCycleOrchestrator, FixedPriceFeed};
use quorum_agents::test_support::ScriptedAnalyst;
use quorum_agents::Analyst;
use quorum_core::{
    AnalystRole, Category, Clock, ClockError, DayPhase, EventRecorder, EventType, MarketStatus,
    Position, QuorumConfig, Round, Signal, SystemClock, TradeAction, TradingDayState, Urgency,
    VirtualClock,
};
use quorum_store::{DayStore, MemoryBackend, SqliteMemoryBackend};
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

fn config(mode: &str) -> QuorumConfig {
    toml::from_str(&format!(
        r#"
[run]
name = "test"
tickers = ["AAPL", "MSFT"]
start_date = "2025-01-06"
end_date = "2025-01-13"
mode = "{mode}"
"#
    ))
    .unwrap()
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}

fn virtual_clock() -> Arc<VirtualClock> {
    Arc::new(VirtualClock::frozen_at(
        Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap(),
    ))
}

fn prices() -> Arc<FixedPriceFeed> {
    Arc::new(FixedPriceFeed::new([
        ("AAPL".to_string(), dec!(200)),
        ("MSFT".to_string(), dec!(400)),
    ]))
}

fn bullish_team() -> (Arc<ScriptedAnalyst>, Vec<Arc<dyn Analyst>>) {
    let fundamentals = Arc::new(
        ScriptedAnalyst::new("fundamentals_analyst", AnalystRole::Fundamentals)
            .with_signal(Round::One, "AAPL", Signal::Bullish, dec!(80)),
    );
    let sentiment = Arc::new(
        ScriptedAnalyst::new("sentiment_analyst", AnalystRole::Sentiment)
            .with_signal(Round::One, "AAPL", Signal::Bullish, dec!(70)),
    );
    let team: Vec<Arc<dyn Analyst>> = vec![fundamentals.clone(), sentiment];
    (fundamentals, team)
}

#[tokio::test]
async fn portfolio_day_holds_until_close_then_trades() {
    let clock = virtual_clock();
    let (_, team) = bullish_team();
    let orchestrator =
        DayCycleOrchestrator::new(&config("portfolio"), clock.clone(), team, prices()).unwrap();

    let outcome = orchestrator.run_day(date(6), None).await.unwrap();
    let state = &outcome.state;

    assert!(state.is_complete());
    assert_eq!(state.market_status, MarketStatus::Closed);

    let close = Utc.with_ymd_and_hms(2025, 1, 6, 21, 0, 0).unwrap();
    assert_eq!(clock.now(), close);
    assert_eq!(state.trades.len(), 1);
    let trade = &state.trades[0];
    assert_eq!(trade.ticker, "AAPL");
    assert_eq!(trade.action, TradeAction::Long);
    assert_eq!(trade.quantity, dec!(100));
    assert!(trade.executed_at >= close);

    assert_eq!(state.holdings["AAPL"].quantity, dec!(100));
    assert_eq!(state.portfolio.cash, dec!(80000));
    assert_eq!(state.portfolio.total_value, dec!(100000));
    assert_eq!(state.decision_for("MSFT").unwrap().action, TradeAction::Hold);
    assert_eq!(state.signals_by_ticker["AAPL"].len(), 2);

    let timeline = &outcome.timeline;
    assert_eq!(timeline.first().unwrap().event_type, EventType::DayStart);
    assert_eq!(timeline.last().unwrap().event_type, EventType::DayComplete);
    assert!(timeline
        .windows(2)
        .all(|w| w[0].relative_timestamp_ms <= w[1].relative_timestamp_ms));

    let phases: Vec<String> = timeline
        .iter()
        .filter(|e| e.event_type == EventType::PhaseChange)
        .map(|e| e.payload["to"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        phases,
        vec!["analyzing", "communicating", "deciding", "executing", "reflecting", "done"]
    );

    for expected in [
        EventType::Signal,
        EventType::PriceUpdate,
        EventType::FastForwardSuccess,
        EventType::TimeUpdate,
        EventType::TeamTrades,
        EventType::TeamPortfolio,
        EventType::TeamSummary,
        EventType::TeamStats,
        EventType::TeamLeaderboard,
    ] {
        assert!(
            timeline.iter().any(|e| e.event_type == expected),
            "missing {expected:?}"
        );
    }

    // Every trade event comes after the close was reached.
    let reached_close = timeline
        .iter()
        .position(|e| e.event_type == EventType::TimeUpdate)
        .unwrap();
    let trades_at = timeline
        .iter()
        .position(|e| e.event_type == EventType::TeamTrades)
        .unwrap();
    assert!(reached_close < trades_at);
}

#[tokio::test]
async fn risk_warning_revision_drives_the_decision() {
    let fundamentals = Arc::new(
        ScriptedAnalyst::new("fundamentals_analyst", AnalystRole::Fundamentals)
            .with_signal(Round::One, "AAPL", Signal::Bullish, dec!(70))
            .with_revision("AAPL", Signal::Neutral, dec!(55), Some(true)),
    );
    let sentiment = Arc::new(
        ScriptedAnalyst::new("sentiment_analyst", AnalystRole::Sentiment)
            .with_signal(Round::One, "AAPL", Signal::Neutral, dec!(50))
            .with_notification(
                "AAPL supplier guidance cut; expect pressure",
                Urgency::High,
                Category::RiskWarning,
            ),
    );
    let team: Vec<Arc<dyn Analyst>> = vec![fundamentals.clone(), sentiment.clone()];
    let orchestrator =
        DayCycleOrchestrator::new(&config("signal"), virtual_clock(), team, prices()).unwrap();

    let outcome = orchestrator.run_day(date(6), None).await.unwrap();
    let state = &outcome.state;
    assert!(state.is_complete());
    assert!(state.failures.is_empty(), "{:?}", state.failures);

    // Round 1 alone would have voted long on AAPL.
    let aapl = &state.signals_by_ticker["AAPL"];
    assert_eq!(aapl.len(), 3);
    let revised = aapl
        .iter()
        .find(|r| r.analyst_id == "fundamentals_analyst" && r.round == Round::Two)
        .unwrap();
    assert_eq!(revised.signal, Signal::Neutral);
    assert_eq!(revised.confidence, dec!(55));
    assert!(aapl
        .iter()
        .any(|r| r.analyst_id == "fundamentals_analyst" && r.round == Round::One));

    // The sender is not re-invoked; only the recipient revises.
    assert_eq!(fundamentals.analyze_calls(), 2);
    assert_eq!(sentiment.analyze_calls(), 1);

    let decision = state.decision_for("AAPL").unwrap();
    assert_eq!(decision.action, TradeAction::Hold);
    assert_eq!(decision.quantity, dec!(0));

    let summary = outcome
        .timeline
        .iter()
        .find(|e| e.event_type == EventType::TeamSummary)
        .unwrap();
    let summarized = summary.payload["decisions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["ticker"] == "AAPL")
        .unwrap();
    assert_eq!(summarized["action"], "hold");
    assert!(outcome
        .timeline
        .iter()
        .any(|e| e.event_type == EventType::AgentMessage));
}

#[tokio::test]
async fn signal_mode_records_decisions_without_trading() {
    let (_, team) = bullish_team();
    let orchestrator =
        DayCycleOrchestrator::new(&config("signal"), virtual_clock(), team, prices()).unwrap();
    let outcome = orchestrator.run_day(date(6), None).await.unwrap();

    assert!(outcome.state.trades.is_empty());
    assert!(outcome.state.holdings.is_empty());
    assert_eq!(outcome.state.decision_for("AAPL").unwrap().action, TradeAction::Long);
    assert_eq!(outcome.state.portfolio.cash, dec!(100000));
}

#[tokio::test]
async fn weekend_is_non_trading_and_carries_holdings() {
    let (fundamentals, team) = bullish_team();
    let orchestrator =
        DayCycleOrchestrator::new(&config("portfolio"), virtual_clock(), team, prices()).unwrap();

    let mut friday = TradingDayState::opening(date(10), MarketStatus::Closed, None, dec!(50000));
    friday.holdings.insert(
        "AAPL".to_string(),
        Position {
            quantity: dec!(10),
            average_price: dec!(190),
        },
    );

    let outcome = orchestrator.run_day(date(11), Some(&friday)).await.unwrap();
    assert_eq!(outcome.state.market_status, MarketStatus::NonTrading);
    assert_eq!(outcome.state.phase, DayPhase::Done);
    assert_eq!(outcome.state.holdings, friday.holdings);
    assert_eq!(outcome.state.portfolio, friday.portfolio);
    assert_eq!(fundamentals.analyze_calls(), 0);
    assert_eq!(outcome.timeline.len(), 3);
}

#[tokio::test]
async fn cancelled_before_start_leaves_opening_state() {
    let (fundamentals, team) = bullish_team();
    let token = CancellationToken::new();
    token.cancel();
    let orchestrator =
        DayCycleOrchestrator::new(&config("portfolio"), virtual_clock(), team, prices())
            .unwrap()
            .with_cancellation(token);

    let outcome = orchestrator.run_day(date(6), None).await.unwrap();
    assert_eq!(outcome.state.aborted_at, Some(DayPhase::PreMarket));
    assert!(!outcome.state.is_complete());
    assert!(outcome.state.holdings.is_empty());
    assert_eq!(fundamentals.analyze_calls(), 0);
    assert_eq!(
        outcome.timeline.last().unwrap().event_type,
        EventType::DayComplete
    );
}

/// A weekday at least two days out, so its close is still ahead in wall time.
fn upcoming_weekday() -> NaiveDate {
    let mut day = Utc::now().date_naive() + chrono::Duration::days(2);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day += chrono::Duration::days(1);
    }
    day
}

#[tokio::test]
async fn cancellation_while_holding_under_system_clock_skips_execution() {
    let day = upcoming_weekday();
    let mut config = config("portfolio");
    config.run.start_date = day;
    config.run.end_date = day;
    config.market.open = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
    config.market.close = NaiveTime::from_hms_opt(23, 59, 0).unwrap();
    config.market.utc_offset_hours = 0;

    let (_, team) = bullish_team();
    let orchestrator =
        DayCycleOrchestrator::new(&config, Arc::new(SystemClock), team, prices()).unwrap();

    let yesterday = day - chrono::Duration::days(1);
    let mut prior =
        TradingDayState::opening(yesterday, MarketStatus::Closed, None, dec!(100000));
    prior.holdings.insert(
        "MSFT".to_string(),
        Position {
            quantity: dec!(-5),
            average_price: dec!(410),
        },
    );

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let outcome = orchestrator.run_day(day, Some(&prior)).await.unwrap();
    assert_eq!(outcome.state.aborted_at, Some(DayPhase::Deciding));
    assert!(outcome.state.trades.is_empty());
    assert_eq!(outcome.state.holdings, prior.holdings);
    assert_eq!(outcome.state.decision_for("AAPL").unwrap().action, TradeAction::Long);
}

#[tokio::test]
async fn fast_forward_only_under_virtual_clock() {
    let (_, team) = bullish_team();
    let real =
        DayCycleOrchestrator::new(&config("signal"), Arc::new(SystemClock), team.clone(), prices())
            .unwrap();
    let recorder = EventRecorder::new(Utc::now(), Arc::new(SystemClock));
    assert!(matches!(
        real.fast_forward(30, &recorder),
        Err(CycleError::Clock(ClockError::NotVirtual(_)))
    ));
    assert!(recorder.is_empty());

    let clock = virtual_clock();
    let simulated =
        DayCycleOrchestrator::new(&config("signal"), clock.clone(), team, prices()).unwrap();
    let before = clock.now();
    let recorder = EventRecorder::new(before, clock.clone());
    let after = simulated.fast_forward(30, &recorder).unwrap();
    assert_eq!(after - before, chrono::Duration::minutes(30));
    assert_eq!(recorder.snapshot()[0].event_type, EventType::FastForwardSuccess);
    assert_eq!(recorder.snapshot()[0].relative_timestamp_ms, 30 * 60_000);
}

#[tokio::test]
async fn duplicate_analyst_ids_are_rejected() {
    let a: Arc<dyn Analyst> = Arc::new(ScriptedAnalyst::new("x", AnalystRole::Technical));
    let b: Arc<dyn Analyst> = Arc::new(ScriptedAnalyst::new("x", AnalystRole::Valuation));
    let result =
        DayCycleOrchestrator::new(&config("signal"), virtual_clock(), vec![a, b], prices());
    assert!(matches!(result, Err(CycleError::Config(_))));
}

#[tokio::test]
async fn multi_day_run_persists_and_seeds_each_day() {
    let tmp = tempfile::tempdir().unwrap();
    let store = DayStore::new(tmp.path(), "test").unwrap();
    let memory = Arc::new(SqliteMemoryBackend::in_memory());

    let (fundamentals, team) = bullish_team();
    let orchestrator =
        DayCycleOrchestrator::new(&config("portfolio"), virtual_clock(), team, prices())
            .unwrap()
            .with_memory(memory.clone());

    // Friday through Monday.
    let summary = run_range(&orchestrator, &store, date(10), date(13)).await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.days, vec![date(10), date(11), date(12), date(13)]);
    assert_eq!(store.list_days().unwrap(), summary.days);

    let friday = store.load_state(date(10)).unwrap().unwrap();
    let saturday = store.load_state(date(11)).unwrap().unwrap();
    let monday = store.load_state(date(13)).unwrap().unwrap();
    assert_eq!(friday.holdings["AAPL"].quantity, dec!(100));
    assert_eq!(saturday.market_status, MarketStatus::NonTrading);
    assert_eq!(saturday.holdings, friday.holdings);
    // 25% of 100000 at 200 is 125 shares; Monday only tops up to the limit.
    assert_eq!(monday.decision_for("AAPL").unwrap().quantity, dec!(25));
    assert_eq!(monday.holdings["AAPL"].quantity, dec!(125));
    assert_eq!(monday.portfolio.cash, dec!(75000));
    assert!(!store.load_timeline(date(13)).unwrap().is_empty());

    // Friday's reflection seeded Monday's round-1 prompt.
    assert!(!memory
        .search("AAPL", "fundamentals_analyst", 3)
        .unwrap()
        .is_empty());
    let monday_request = fundamentals.requests().into_iter().last().unwrap();
    assert_eq!(monday_request.as_of, date(13));
    assert!(!monday_request.historical_context.is_empty());

    // A later run resumes from the persisted Monday, already at the limit.
    let summary = run_range(&orchestrator, &store, date(14), date(14)).await.unwrap();
    let tuesday = summary.last_state.unwrap();
    assert_eq!(tuesday.decision_for("AAPL").unwrap().action, TradeAction::Hold);
    assert!(tuesday.trades.is_empty());
    assert_eq!(tuesday.holdings["AAPL"].quantity, dec!(125));
}
