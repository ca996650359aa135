//! One trading day as a state machine:
//! PRE_MARKET → ANALYZING → COMMUNICATING → DECIDING → EXECUTING → REFLECTING → DONE.
//!
//! Cancellation is checked at every phase boundary and while holding for the
//! close. A cancelled day keeps its last committed state; trades are applied
//! to a copy of the holdings and committed in one step, so execution is never
//! left half done.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use quorum_agents::{
    Analyst, AnalystInputs, AnalystScheduler, CommunicationEngine, DecisionInput,
    NotificationBroker, PortfolioManager, RiskManager, RoundContext, RulePortfolioManager,
    RuleRiskManager, SchedulerConfig, SignalStore,
};
use quorum_core::{
    Clock, ConfigError, DayPhase, EventRecorder, EventType, MarketStatus, NotificationConfig,
    NotificationDraft, PartialFailure, PortfolioConfig, PortfolioSnapshot, Position, QuorumConfig,
    Round, RunConfig, RunMode, SessionRequest, Signal, SignalRecord, TimelineEvent, Trade,
    TradeAction, TradingDayState,
};
use quorum_store::MemoryBackend;
use rust_decimal::Decimal;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::calendar::TradingCalendar;
use crate::error::CycleError;
use crate::market::PriceFeed;

/// A finished (or aborted) day: the frozen state and its timeline.
#[derive(Debug, Clone)]
pub struct DayOutcome {
    pub state: TradingDayState,
    pub timeline: Vec<TimelineEvent>,
}

struct DayRun {
    state: TradingDayState,
    recorder: EventRecorder,
    store: SignalStore,
    sessions: usize,
}

impl DayRun {
    fn into_outcome(self) -> DayOutcome {
        DayOutcome {
            timeline: self.recorder.snapshot(),
            state: self.state,
        }
    }
}

pub struct DayCycleOrchestrator {
    run: RunConfig,
    portfolio: PortfolioConfig,
    notifications: NotificationConfig,
    memory_top_k: usize,
    clock: Arc<dyn Clock>,
    calendar: TradingCalendar,
    analysts: BTreeMap<String, Arc<dyn Analyst>>,
    broker: Arc<NotificationBroker>,
    scheduler: AnalystScheduler,
    engine: CommunicationEngine,
    risk_manager: Box<dyn RiskManager>,
    portfolio_manager: Box<dyn PortfolioManager>,
    prices: Arc<dyn PriceFeed>,
    memory: Option<Arc<dyn MemoryBackend>>,
    session_requests: Vec<SessionRequest>,
    cancel: CancellationToken,
}

impl DayCycleOrchestrator {
    /// Wire a team into a day cycle. Every analyst is registered with a fresh
    /// broker; the rule-based risk and portfolio managers are the defaults.
    pub fn new(
        config: &QuorumConfig,
        clock: Arc<dyn Clock>,
        analysts: Vec<Arc<dyn Analyst>>,
        prices: Arc<dyn PriceFeed>,
    ) -> Result<Self, CycleError> {
        config.validate()?;
        let calendar = TradingCalendar::new(&config.market)?;
        let broker = Arc::new(NotificationBroker::new(Arc::clone(&clock)));

        let mut team: BTreeMap<String, Arc<dyn Analyst>> = BTreeMap::new();
        for analyst in analysts {
            let id = analyst.id().to_string();
            if team.contains_key(&id) {
                return Err(ConfigError(format!("duplicate analyst id: {id}")).into());
            }
            broker.register(&id);
            team.insert(id, analyst);
        }
        if team.is_empty() {
            return Err(ConfigError("no analysts".to_string()).into());
        }

        let scheduler =
            AnalystScheduler::new(SchedulerConfig::from(&config.agents), Arc::clone(&clock));
        let engine = CommunicationEngine::new(
            config.communication.clone(),
            Arc::clone(&broker),
            Arc::clone(&clock),
        );

        Ok(Self {
            run: config.run.clone(),
            portfolio: config.portfolio.clone(),
            notifications: config.notifications.clone(),
            memory_top_k: config.agents.memory_top_k,
            clock,
            calendar,
            analysts: team,
            broker,
            scheduler,
            engine,
            risk_manager: Box::new(RuleRiskManager::new(config.portfolio.max_position_pct)),
            portfolio_manager: Box::new(RulePortfolioManager::new(config.portfolio.order_quantity)),
            prices,
            memory: None,
            session_requests: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Long-term memory for prompt history and end-of-day reflection.
    pub fn with_memory(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.engine = self.engine.with_memory(Arc::clone(&backend), self.memory_top_k);
        self.memory = Some(backend);
        self
    }

    pub fn with_portfolio_manager(mut self, manager: Box<dyn PortfolioManager>) -> Self {
        self.portfolio_manager = manager;
        self
    }

    pub fn with_risk_manager(mut self, manager: Box<dyn RiskManager>) -> Self {
        self.risk_manager = manager;
        self
    }

    /// Sessions to hold every day on top of the disagreement-driven ones.
    pub fn with_session_requests(mut self, requests: Vec<SessionRequest>) -> Self {
        self.session_requests = requests;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn broker(&self) -> &Arc<NotificationBroker> {
        &self.broker
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    /// Skip simulated time ahead. Rejected under the system clock.
    pub fn fast_forward(
        &self,
        minutes: i64,
        recorder: &EventRecorder,
    ) -> Result<DateTime<Utc>, CycleError> {
        let now = self.clock.fast_forward(minutes)?;
        recorder.record(
            EventType::FastForwardSuccess,
            json!({ "minutes": minutes, "simulated_time": now }),
        );
        info!(minutes, simulated = %now, "Fast-forwarded");
        Ok(now)
    }

    /// Run one calendar day, seeded from the previous day's frozen state.
    pub async fn run_day(
        &self,
        date: NaiveDate,
        prior: Option<&TradingDayState>,
    ) -> Result<DayOutcome, CycleError> {
        if self.clock.is_virtual() {
            self.clock.advance_to(self.calendar.pre_market_at(date)?)?;
        }
        let day_start = self.clock.now();
        let status = self.calendar.status(date, day_start)?;

        let mut day = DayRun {
            state: TradingDayState::opening(date, status, prior, self.portfolio.initial_cash),
            recorder: EventRecorder::new(day_start, Arc::clone(&self.clock)),
            store: SignalStore::new(),
            sessions: 0,
        };
        day.recorder.record(
            EventType::DayStart,
            json!({
                "date": date,
                "market_status": status,
                "clock": self.clock.kind(),
                "simulated_time": day_start,
                "tickers": self.run.tickers,
                "portfolio": day.state.portfolio,
            }),
        );
        info!(%date, ?status, clock = ?self.clock.kind(), "Trading day started");

        if status == MarketStatus::NonTrading {
            self.transition(&mut day, DayPhase::Done);
            return Ok(self.complete(day));
        }

        // ANALYZING
        if !self.advance(&mut day) {
            return Ok(day.into_outcome());
        }
        let ctx = self.round_context(date);
        let drafts = self.analyze(&mut day, &ctx).await;
        let round_one_done = self.clock.now();
        self.engine.publish(&drafts, &day.recorder)?;

        // COMMUNICATING
        if !self.advance(&mut day) {
            return Ok(day.into_outcome());
        }
        self.communicate(&mut day, &ctx, round_one_done).await;

        // DECIDING
        if !self.advance(&mut day) {
            return Ok(day.into_outcome());
        }
        let prices = self.fetch_prices(&mut day).await;
        self.decide(&mut day, &prices).await;
        if !self.hold_until_close(&mut day).await? {
            self.abort(&mut day);
            return Ok(day.into_outcome());
        }
        day.state.market_status = self.calendar.status(date, self.clock.now())?;

        // EXECUTING
        if !self.advance(&mut day) {
            return Ok(day.into_outcome());
        }
        self.execute(&mut day, &prices);

        // REFLECTING
        if !self.advance(&mut day) {
            return Ok(day.into_outcome());
        }
        self.reflect(&mut day);

        self.step(&mut day);
        Ok(self.complete(day))
    }

    /// Move to the next phase in order unless the day was cancelled.
    fn advance(&self, day: &mut DayRun) -> bool {
        if self.aborted(day) {
            return false;
        }
        self.step(day);
        true
    }

    fn step(&self, day: &mut DayRun) {
        let next = day.state.phase.next();
        self.transition(day, next);
    }

    fn transition(&self, day: &mut DayRun, next: DayPhase) {
        let from = day.state.phase;
        day.recorder.record(
            EventType::PhaseChange,
            json!({ "from": from, "to": next, "simulated_time": self.clock.now() }),
        );
        debug!(date = %day.state.date, from = from.as_str(), to = next.as_str(), "Phase change");
        day.state.phase = next;
    }

    fn aborted(&self, day: &mut DayRun) -> bool {
        if self.cancel.is_cancelled() {
            self.abort(day);
            true
        } else {
            false
        }
    }

    fn abort(&self, day: &mut DayRun) {
        let phase = day.state.phase;
        day.state.aborted_at = Some(phase);
        day.state.signals_by_ticker = day.store.by_ticker();
        day.recorder.record(
            EventType::DayComplete,
            json!({ "date": day.state.date, "aborted_at": phase }),
        );
        warn!(date = %day.state.date, phase = phase.as_str(), "Trading day cancelled");
    }

    fn complete(&self, day: DayRun) -> DayOutcome {
        day.recorder.record(
            EventType::DayComplete,
            json!({
                "date": day.state.date,
                "market_status": day.state.market_status,
                "portfolio": day.state.portfolio,
                "trades": day.state.trades.len(),
                "failures": day.state.failures.len(),
            }),
        );
        info!(
            date = %day.state.date,
            total_value = %day.state.portfolio.total_value,
            trades = day.state.trades.len(),
            "Trading day complete"
        );
        day.into_outcome()
    }

    fn round_context(&self, date: NaiveDate) -> RoundContext {
        let mut ctx = RoundContext::new(date);
        ctx.pipeline_context = self.run.pipeline_context.clone();
        if let Some(memory) = &self.memory {
            let query = self.run.tickers.join(" ");
            for analyst_id in self.analysts.keys() {
                match memory.search(&query, analyst_id, self.memory_top_k) {
                    Ok(history) if !history.is_empty() => {
                        ctx.inputs.insert(
                            analyst_id.clone(),
                            AnalystInputs {
                                historical_context: history,
                                ..Default::default()
                            },
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(analyst = %analyst_id, error = %e, "Long-term memory search failed")
                    }
                }
            }
        }
        ctx
    }

    fn record_signal(&self, day: &DayRun, record: &SignalRecord) {
        day.recorder.record(
            EventType::Signal,
            serde_json::to_value(record).unwrap_or_default(),
        );
    }

    fn record_failures(&self, day: &mut DayRun, failures: Vec<PartialFailure>) {
        for failure in failures {
            day.recorder.record(
                EventType::PartialFailure,
                serde_json::to_value(&failure).unwrap_or_default(),
            );
            day.state.failures.push(failure);
        }
    }

    async fn analyze(
        &self,
        day: &mut DayRun,
        ctx: &RoundContext,
    ) -> BTreeMap<String, NotificationDraft> {
        let team: Vec<Arc<dyn Analyst>> = self.analysts.values().cloned().collect();
        let outcome = self
            .scheduler
            .run(&team, &self.run.tickers, Round::One, ctx)
            .await;

        for record in outcome.signals.into_values() {
            match day.store.insert(record.clone()) {
                Ok(()) => self.record_signal(day, &record),
                Err(e) => error!(key = %record.key(), error = %e, "Round-1 record rejected"),
            }
        }
        self.record_failures(day, outcome.failures);
        day.state.signals_by_ticker = day.store.by_ticker();
        outcome.notifications
    }

    async fn communicate(
        &self,
        day: &mut DayRun,
        ctx: &RoundContext,
        round_one_done: DateTime<Utc>,
    ) {
        let outcome = self
            .engine
            .communicate(
                &mut day.store,
                &self.analysts,
                &self.scheduler,
                ctx,
                &self.session_requests,
                round_one_done,
                &day.recorder,
            )
            .await;

        for record in &outcome.revised {
            self.record_signal(day, record);
        }
        day.sessions = outcome.sessions.len();
        self.record_failures(day, outcome.failures);
        day.state.signals_by_ticker = day.store.by_ticker();
    }

    async fn fetch_prices(&self, day: &mut DayRun) -> BTreeMap<String, Decimal> {
        let mut prices = BTreeMap::new();
        for ticker in &self.run.tickers {
            match self.prices.close_price(ticker, day.state.date).await {
                Ok(Some(price)) => {
                    prices.insert(ticker.clone(), price);
                }
                Ok(None) => warn!(ticker = %ticker, date = %day.state.date, "No close price"),
                Err(e) => warn!(ticker = %ticker, error = %e, "Price lookup failed"),
            }
        }
        day.recorder.record(
            EventType::PriceUpdate,
            json!({ "date": day.state.date, "prices": prices }),
        );
        prices
    }

    async fn decide(&self, day: &mut DayRun, prices: &BTreeMap<String, Decimal>) {
        let finals = day.store.final_by_ticker();
        let risk: BTreeMap<_, _> = finals
            .iter()
            .map(|(ticker, records)| {
                (
                    ticker.clone(),
                    self.risk_manager.assess(ticker, records, &day.state.portfolio),
                )
            })
            .collect();

        let decisions = {
            let input = DecisionInput {
                signals: &finals,
                risk: &risk,
                prices,
                portfolio: &day.state.portfolio,
                holdings: &day.state.holdings,
            };
            self.portfolio_manager.decide(&input).await
        };

        for decision in &decisions {
            info!(
                ticker = %decision.ticker,
                action = ?decision.action,
                quantity = %decision.quantity,
                confidence = %decision.confidence,
                "Decision"
            );
        }
        day.state.risk = risk;
        day.state.decisions = decisions;
    }

    /// Wait in DECIDING for the session close. Returns false if cancelled
    /// while waiting.
    async fn hold_until_close(&self, day: &mut DayRun) -> Result<bool, CycleError> {
        let close = self.calendar.close_at(day.state.date)?;
        let now = self.clock.now();
        if now >= close {
            return Ok(true);
        }
        info!(date = %day.state.date, %close, "Holding until market close");

        if self.clock.is_virtual() {
            let minutes = (close - now).num_minutes();
            if minutes > 0 {
                self.fast_forward(minutes, &day.recorder)?;
            }
            let at = self.clock.advance_to(close)?;
            day.recorder.record(
                EventType::TimeUpdate,
                json!({ "simulated_time": at, "reason": "market_close" }),
            );
            return Ok(true);
        }

        let wait = (close - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(false),
            _ = tokio::time::sleep(wait) => {
                day.recorder.record(
                    EventType::TimeUpdate,
                    json!({ "simulated_time": self.clock.now(), "reason": "market_close" }),
                );
                Ok(true)
            }
        }
    }

    fn execute(&self, day: &mut DayRun, prices: &BTreeMap<String, Decimal>) {
        let margin = self.portfolio.margin_requirement;
        let mut skipped = Vec::new();

        match self.run.mode {
            RunMode::Signal => {
                info!(date = %day.state.date, "Signal mode; decisions recorded without trading");
            }
            RunMode::Portfolio => {
                let fill = simulate_fills(&day.state, prices, margin, self.clock.now());
                // Commit in one step.
                day.state.holdings = fill.holdings;
                day.state.portfolio.cash = fill.cash;
                day.state.trades = fill.trades;
                skipped = fill.skipped;
            }
        }

        day.state.portfolio = PortfolioSnapshot::revalue(
            day.state.portfolio.cash,
            &day.state.holdings,
            prices,
            margin,
        );

        day.recorder.record(
            EventType::TeamTrades,
            json!({ "trades": day.state.trades, "skipped": skipped }),
        );
        day.recorder.record(
            EventType::TeamPortfolio,
            json!({ "portfolio": day.state.portfolio, "holdings": day.state.holdings }),
        );
    }

    fn reflect(&self, day: &mut DayRun) {
        let finals = day.store.final_signals();

        if let Some(memory) = &self.memory {
            for record in finals.values() {
                let decision = day.state.decision_for(&record.ticker);
                let text = format!(
                    "{} {}: I was {} ({}) in round {}. Team decision: {}. {}",
                    day.state.date,
                    record.ticker,
                    record.signal,
                    record.confidence,
                    record.round,
                    decision
                        .map(|d| format!("{:?} {}", d.action, d.quantity))
                        .unwrap_or_else(|| "none".to_string()),
                    record.reasoning,
                );
                let metadata = json!({
                    "date": day.state.date,
                    "ticker": record.ticker,
                    "round": record.round,
                    "signal": record.signal,
                });
                if let Err(e) = memory.add(&text, &record.analyst_id, &metadata) {
                    warn!(
                        analyst = %record.analyst_id,
                        error = %e,
                        "Failed to write long-term memory"
                    );
                }
            }
        }

        let pruned = self.broker.prune(self.notifications.retention_days);

        day.recorder.record(
            EventType::TeamSummary,
            json!({
                "date": day.state.date,
                "decisions": day.state.decisions,
            }),
        );
        day.recorder.record(
            EventType::TeamStats,
            json!({
                "round_one_signals": day.store.round(Round::One).len(),
                "round_two_signals": day.store.round(Round::Two).len(),
                "sessions": day.sessions,
                "failures": day.state.failures.len(),
                "trades": day.state.trades.len(),
                "notifications_pruned": pruned,
            }),
        );
        day.recorder.record(
            EventType::TeamLeaderboard,
            json!({ "rankings": leaderboard(&finals, &day.state) }),
        );
    }
}

/// Analysts ranked by how often their final call matched the decision.
fn leaderboard(
    finals: &BTreeMap<quorum_core::SignalKey, SignalRecord>,
    state: &TradingDayState,
) -> Vec<serde_json::Value> {
    let mut tally: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for record in finals.values() {
        let Some(decision) = state.decision_for(&record.ticker) else {
            continue;
        };
        let agreed = matches!(
            (record.signal, decision.action),
            (Signal::Bullish, TradeAction::Long)
                | (Signal::Bearish, TradeAction::Short)
                | (Signal::Neutral, TradeAction::Hold)
        );
        let entry = tally.entry(record.analyst_id.as_str()).or_default();
        entry.1 += 1;
        if agreed {
            entry.0 += 1;
        }
    }

    let mut rows: Vec<(&str, usize, usize)> = tally
        .into_iter()
        .map(|(id, (agreed, total))| (id, agreed, total))
        .collect();
    // agreed/total descending, compared without division.
    rows.sort_by(|a, b| (b.1 * a.2).cmp(&(a.1 * b.2)).then(a.0.cmp(b.0)));
    rows.into_iter()
        .map(|(id, agreed, total)| json!({ "analyst_id": id, "agreed": agreed, "total": total }))
        .collect()
}

struct Fill {
    holdings: BTreeMap<String, Position>,
    cash: Decimal,
    trades: Vec<Trade>,
    skipped: Vec<String>,
}

/// Apply the day's decisions to a copy of the book. A long needs free cash
/// for its notional; a short needs free cash for its margin.
fn simulate_fills(
    state: &TradingDayState,
    prices: &BTreeMap<String, Decimal>,
    margin_requirement: Decimal,
    at: DateTime<Utc>,
) -> Fill {
    let mut holdings = state.holdings.clone();
    let mut cash = state.portfolio.cash;
    let mut trades = Vec::new();
    let mut skipped = Vec::new();

    for decision in &state.decisions {
        if decision.quantity <= Decimal::ZERO {
            continue;
        }
        let Some(&price) = prices.get(&decision.ticker) else {
            warn!(ticker = %decision.ticker, "No price; trade skipped");
            skipped.push(format!("{}: no price", decision.ticker));
            continue;
        };
        let notional = decision.quantity * price;
        let (signed, required) = match decision.action {
            TradeAction::Long => (decision.quantity, notional),
            TradeAction::Short => (-decision.quantity, notional * margin_requirement),
            TradeAction::Hold => continue,
        };

        let reserved =
            PortfolioSnapshot::revalue(cash, &holdings, prices, margin_requirement).margin_used;
        let available = cash - reserved;
        if required > available {
            warn!(
                ticker = %decision.ticker,
                required = %required,
                available = %available,
                "Insufficient cash or margin; trade skipped"
            );
            skipped.push(format!("{}: needs {required}, has {available}", decision.ticker));
            continue;
        }

        cash -= signed * price;
        apply_fill(&mut holdings, &decision.ticker, signed, price);
        trades.push(Trade {
            ticker: decision.ticker.clone(),
            action: decision.action,
            quantity: decision.quantity,
            price,
            executed_at: at,
        });
    }

    Fill {
        holdings,
        cash,
        trades,
        skipped,
    }
}

fn apply_fill(
    holdings: &mut BTreeMap<String, Position>,
    ticker: &str,
    signed: Decimal,
    price: Decimal,
) {
    let (old_qty, old_avg) = holdings
        .get(ticker)
        .map(|p| (p.quantity, p.average_price))
        .unwrap_or((Decimal::ZERO, price));
    let new_qty = old_qty + signed;

    if new_qty.is_zero() {
        holdings.remove(ticker);
        return;
    }

    let opened_or_flipped =
        old_qty.is_zero() || old_qty.is_sign_negative() != new_qty.is_sign_negative();
    let average_price = if opened_or_flipped {
        price
    } else if old_qty.is_sign_negative() == signed.is_sign_negative() {
        (old_qty.abs() * old_avg + signed.abs() * price) / new_qty.abs()
    } else {
        old_avg
    };

    holdings.insert(
        ticker.to_string(),
        Position {
            quantity: new_qty,
            average_price,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::{MarketStatus, TickerDecision};
    use rust_decimal_macros::dec;

    fn state_with(decisions: Vec<TickerDecision>, cash: Decimal) -> TradingDayState {
        let mut state = TradingDayState::opening(
            NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            MarketStatus::Closed,
            None,
            cash,
        );
        state.decisions = decisions;
        state
    }

    fn decision(ticker: &str, action: TradeAction, quantity: Decimal) -> TickerDecision {
        TickerDecision {
            ticker: ticker.to_string(),
            action,
            quantity,
            confidence: dec!(60),
            reasoning: String::new(),
        }
    }

    #[test]
    fn fills_longs_and_shorts_within_cash() {
        let state = state_with(
            vec![
                decision("AAPL", TradeAction::Long, dec!(10)),
                decision("MSFT", TradeAction::Short, dec!(5)),
                decision("NVDA", TradeAction::Hold, dec!(0)),
            ],
            dec!(10000),
        );
        let prices = BTreeMap::from([
            ("AAPL".to_string(), dec!(200)),
            ("MSFT".to_string(), dec!(400)),
        ]);
        let fill = simulate_fills(&state, &prices, dec!(0.5), Utc::now());

        assert_eq!(fill.trades.len(), 2);
        // 10000 - 2000 + 2000 short proceeds.
        assert_eq!(fill.cash, dec!(10000));
        assert_eq!(fill.holdings["AAPL"].quantity, dec!(10));
        assert_eq!(fill.holdings["MSFT"].quantity, dec!(-5));
        assert!(fill.skipped.is_empty());
    }

    #[test]
    fn unaffordable_trades_are_skipped() {
        let state = state_with(
            vec![
                decision("AAPL", TradeAction::Long, dec!(100)),
                decision("TSLA", TradeAction::Long, dec!(1)),
            ],
            dec!(1000),
        );
        let prices = BTreeMap::from([("AAPL".to_string(), dec!(200))]);
        let fill = simulate_fills(&state, &prices, dec!(0.5), Utc::now());
        assert!(fill.trades.is_empty());
        assert_eq!(fill.cash, dec!(1000));
        assert_eq!(fill.skipped.len(), 2);
    }

    #[test]
    fn average_price_follows_position_changes() {
        let mut holdings = BTreeMap::new();
        apply_fill(&mut holdings, "AAPL", dec!(10), dec!(100));
        apply_fill(&mut holdings, "AAPL", dec!(10), dec!(200));
        assert_eq!(holdings["AAPL"].average_price, dec!(150));

        apply_fill(&mut holdings, "AAPL", dec!(-5), dec!(300));
        assert_eq!(holdings["AAPL"].quantity, dec!(15));
        assert_eq!(holdings["AAPL"].average_price, dec!(150));

        apply_fill(&mut holdings, "AAPL", dec!(-20), dec!(250));
        assert_eq!(holdings["AAPL"].quantity, dec!(-5));
        assert_eq!(holdings["AAPL"].average_price, dec!(250));

        apply_fill(&mut holdings, "AAPL", dec!(5), dec!(240));
        assert!(!holdings.contains_key("AAPL"));
    }

    #[test]
    fn leaderboard_ranks_by_agreement() {
        let mut state = state_with(vec![decision("AAPL", TradeAction::Long, dec!(10))], dec!(0));
        state.decisions.push(decision("MSFT", TradeAction::Hold, dec!(0)));
        let at = Utc::now();
        let mut finals = BTreeMap::new();
        for (analyst, ticker, signal) in [
            ("a", "AAPL", Signal::Bearish),
            ("a", "MSFT", Signal::Neutral),
            ("b", "AAPL", Signal::Bullish),
            ("b", "MSFT", Signal::Neutral),
        ] {
            let record = SignalRecord::from_output(
                analyst,
                ticker,
                &quorum_core::SignalOutput {
                    signal,
                    confidence: dec!(60),
                    reasoning: String::new(),
                    signal_adjustment: None,
                },
                Round::One,
                at,
            );
            finals.insert(record.key(), record);
        }
        let rows = leaderboard(&finals, &state);
        assert_eq!(rows[0]["analyst_id"], "b");
        assert_eq!(rows[0]["agreed"], 2);
        assert_eq!(rows[1]["agreed"], 1);
    }
}
