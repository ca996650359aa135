//! Finalization roles: the risk manager sets per-ticker limits, the portfolio
//! manager turns the latest signals into one decision per ticker.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use quorum_core::{
    PortfolioSnapshot, Position, RiskAssessment, RiskLevel, Signal, SignalRecord, TickerDecision,
    TradeAction,
};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::llm::LanguageModel;
use crate::parser::parse_portfolio_decisions;
use crate::prompts::portfolio_manager_system_prompt;

pub trait RiskManager: Send + Sync {
    fn assess(
        &self,
        ticker: &str,
        signals: &[SignalRecord],
        portfolio: &PortfolioSnapshot,
    ) -> RiskAssessment;
}

/// Limits from signal agreement and a fixed share of portfolio value.
///
/// Split direction is high risk and halves the position limit; low average
/// confidence is medium risk.
#[derive(Debug, Clone)]
pub struct RuleRiskManager {
    max_position_pct: Decimal,
}

impl RuleRiskManager {
    pub fn new(max_position_pct: Decimal) -> Self {
        Self { max_position_pct }
    }
}

impl RiskManager for RuleRiskManager {
    fn assess(
        &self,
        ticker: &str,
        signals: &[SignalRecord],
        portfolio: &PortfolioSnapshot,
    ) -> RiskAssessment {
        let mut warnings = Vec::new();
        let bullish = signals.iter().filter(|s| s.signal == Signal::Bullish).count();
        let bearish = signals.iter().filter(|s| s.signal == Signal::Bearish).count();
        let avg_confidence = if signals.is_empty() {
            Decimal::ZERO
        } else {
            signals.iter().map(|s| s.confidence).sum::<Decimal>() / Decimal::from(signals.len())
        };

        let level = if bullish > 0 && bearish > 0 {
            warnings.push(format!("analysts split: {bullish} bullish, {bearish} bearish"));
            RiskLevel::High
        } else if avg_confidence < Decimal::from(50) {
            warnings.push(format!("low average confidence {}", avg_confidence.round_dp(1)));
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let mut max_position_value =
            (portfolio.total_value * self.max_position_pct).max(Decimal::ZERO);
        if level == RiskLevel::High {
            max_position_value /= Decimal::TWO;
        }

        RiskAssessment {
            ticker: ticker.to_string(),
            level,
            max_position_value,
            warnings,
        }
    }
}

/// Everything the portfolio manager sees for one day.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    /// Latest record per analyst, grouped by ticker.
    pub signals: &'a BTreeMap<String, Vec<SignalRecord>>,
    pub risk: &'a BTreeMap<String, RiskAssessment>,
    pub prices: &'a BTreeMap<String, Decimal>,
    pub portfolio: &'a PortfolioSnapshot,
    pub holdings: &'a BTreeMap<String, Position>,
}

#[async_trait]
pub trait PortfolioManager: Send + Sync {
    /// One decision per ticker in `input.signals`, in ticker order.
    async fn decide(&self, input: &DecisionInput<'_>) -> Vec<TickerDecision>;
}

/// Confidence-weighted vote over the final signals.
#[derive(Debug, Clone)]
pub struct RulePortfolioManager {
    order_quantity: Decimal,
}

impl RulePortfolioManager {
    pub fn new(order_quantity: Decimal) -> Self {
        Self { order_quantity }
    }

    pub fn decide_ticker(&self, ticker: &str, input: &DecisionInput<'_>) -> TickerDecision {
        let records = input.signals.get(ticker).map(Vec::as_slice).unwrap_or_default();
        if records.is_empty() {
            return hold(ticker, "no signals");
        }

        let score: Decimal = records
            .iter()
            .map(|r| Decimal::from(r.signal.direction()) * r.confidence)
            .sum();
        let confidence =
            quorum_core::signal::clamp_confidence(score.abs() / Decimal::from(records.len()));
        let action = if score.is_sign_positive() && !score.is_zero() {
            TradeAction::Long
        } else if score.is_sign_negative() && !score.is_zero() {
            TradeAction::Short
        } else {
            TradeAction::Hold
        };

        let votes: Vec<String> = records
            .iter()
            .map(|r| format!("{} {} {}", r.analyst_id, r.signal, r.confidence))
            .collect();
        let decision = TickerDecision {
            ticker: ticker.to_string(),
            action,
            quantity: if action == TradeAction::Hold {
                Decimal::ZERO
            } else {
                self.order_quantity
            },
            confidence,
            reasoning: format!("weighted vote {}: {}", score.round_dp(1), votes.join(", ")),
        };
        apply_limits(decision, input)
    }
}

#[async_trait]
impl PortfolioManager for RulePortfolioManager {
    async fn decide(&self, input: &DecisionInput<'_>) -> Vec<TickerDecision> {
        input
            .signals
            .keys()
            .map(|ticker| self.decide_ticker(ticker, input))
            .collect()
    }
}

/// Asks a language model, falling back to the rule vote for anything it
/// fails to answer.
pub struct LlmPortfolioManager {
    llm: Arc<dyn LanguageModel>,
    fallback: RulePortfolioManager,
}

impl LlmPortfolioManager {
    pub fn new(llm: Arc<dyn LanguageModel>, fallback: RulePortfolioManager) -> Self {
        Self { llm, fallback }
    }
}

#[async_trait]
impl PortfolioManager for LlmPortfolioManager {
    async fn decide(&self, input: &DecisionInput<'_>) -> Vec<TickerDecision> {
        let prompt = portfolio_prompt(input);
        let parsed = match self.llm.complete(&portfolio_manager_system_prompt(), &prompt).await {
            Ok(raw) => parse_portfolio_decisions(&raw),
            Err(e) => Err(e),
        };

        let mut by_ticker: BTreeMap<String, TickerDecision> = match parsed {
            Ok(decisions) => decisions.into_iter().map(|d| (d.ticker.clone(), d)).collect(),
            Err(e) => {
                warn!(
                    model = self.llm.model(),
                    error = %e,
                    "Portfolio manager failed; using rule vote"
                );
                BTreeMap::new()
            }
        };

        input
            .signals
            .keys()
            .map(|ticker| match by_ticker.remove(ticker) {
                Some(decision) => apply_limits(decision, input),
                None => {
                    debug!(ticker = %ticker, "No model decision; using rule vote");
                    self.fallback.decide_ticker(ticker, input)
                }
            })
            .collect()
    }
}

fn hold(ticker: &str, reasoning: &str) -> TickerDecision {
    TickerDecision {
        ticker: ticker.to_string(),
        action: TradeAction::Hold,
        quantity: Decimal::ZERO,
        confidence: Decimal::ZERO,
        reasoning: reasoning.to_string(),
    }
}

/// Cap quantity so the resulting position stays within the risk limit at the
/// known price. The limit bounds the position's absolute value, so an order
/// that reduces or flips the holding may trade up to the opposite bound. A
/// capped quantity of zero becomes a hold.
fn apply_limits(mut decision: TickerDecision, input: &DecisionInput<'_>) -> TickerDecision {
    let direction = match decision.action {
        TradeAction::Long => Decimal::ONE,
        TradeAction::Short => Decimal::NEGATIVE_ONE,
        TradeAction::Hold => {
            decision.quantity = Decimal::ZERO;
            return decision;
        }
    };
    let limit = input.risk.get(&decision.ticker).map(|r| r.max_position_value);
    let price = input.prices.get(&decision.ticker).copied();
    if let (Some(limit), Some(price)) = (limit, price) {
        if price > Decimal::ZERO {
            let held = input
                .holdings
                .get(&decision.ticker)
                .map(|p| p.quantity)
                .unwrap_or_default();
            let max_shares = (limit / price).floor();
            let room = (max_shares - direction * held).max(Decimal::ZERO);
            if decision.quantity > room {
                debug!(
                    ticker = %decision.ticker,
                    requested = %decision.quantity,
                    held = %held,
                    room = %room,
                    "Quantity capped by risk limit"
                );
                decision.quantity = room;
            }
        }
    }
    if decision.quantity <= Decimal::ZERO {
        decision.quantity = Decimal::ZERO;
        decision.action = TradeAction::Hold;
    }
    decision
}

fn portfolio_prompt(input: &DecisionInput<'_>) -> String {
    let mut prompt = format!(
        "## PORTFOLIO\nCash {}, total value {}, margin used {}\n",
        input.portfolio.cash, input.portfolio.total_value, input.portfolio.margin_used
    );
    for (ticker, records) in input.signals {
        prompt.push_str(&format!("\n## {ticker}\n"));
        if let Some(price) = input.prices.get(ticker) {
            prompt.push_str(&format!("Price: {price}\n"));
        }
        if let Some(position) = input.holdings.get(ticker) {
            prompt.push_str(&format!(
                "Holding: {} @ {}\n",
                position.quantity, position.average_price
            ));
        }
        if let Some(risk) = input.risk.get(ticker) {
            prompt.push_str(&format!(
                "Risk: {:?}, max_position_value {}\n",
                risk.level, risk.max_position_value
            ));
            for warning in &risk.warnings {
                prompt.push_str(&format!("- warning: {warning}\n"));
            }
        }
        for record in records {
            prompt.push_str(&format!(
                "- {} (round {}): {} {}. {}\n",
                record.analyst_id, record.round, record.signal, record.confidence, record.reasoning
            ));
        }
    }
    prompt.push_str("\nDecide one action per ticker.\n");
    prompt
}
