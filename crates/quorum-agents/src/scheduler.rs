use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use quorum_core::{
    AgentsConfig, AnalysisReport, AnalysisRequest, Clock, CommunicationSession, ExecutionMode,
    FailureKind, Notification, NotificationDraft, PartialFailure, Round, SignalKey, SignalOutput,
    SignalRecord,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyst::Analyst;
use crate::error::AgentError;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: ExecutionMode,
    pub max_workers: usize,
    pub analyst_timeout: Duration,
}

impl From<&AgentsConfig> for SchedulerConfig {
    fn from(config: &AgentsConfig) -> Self {
        Self {
            mode: config.execution,
            max_workers: config.max_workers.max(1),
            analyst_timeout: Duration::from_secs(config.analyst_timeout_seconds),
        }
    }
}

/// Extra per-analyst inputs for a round, mostly used in round 2.
#[derive(Debug, Clone, Default)]
pub struct AnalystInputs {
    /// Restricts the ticker set for this analyst.
    pub tickers: Option<Vec<String>>,
    pub prior_signals: BTreeMap<String, SignalRecord>,
    pub notifications: Vec<Notification>,
    pub sessions: Vec<CommunicationSession>,
    pub historical_context: Vec<String>,
}

/// Shared read-only inputs for one scheduler run.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub as_of: NaiveDate,
    pub pipeline_context: BTreeMap<String, serde_json::Value>,
    pub inputs: BTreeMap<String, AnalystInputs>,
}

impl RoundContext {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            pipeline_context: BTreeMap::new(),
            inputs: BTreeMap::new(),
        }
    }
}

/// Merged result of one round.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    pub signals: BTreeMap<SignalKey, SignalRecord>,
    /// Broadcast drafts, by sending analyst.
    pub notifications: BTreeMap<String, NotificationDraft>,
    pub failures: Vec<PartialFailure>,
}

type AnalystResult = Result<Result<AnalysisReport, AgentError>, tokio::time::error::Elapsed>;

/// Runs analysts for one round, sequentially or on a bounded worker pool.
///
/// Each analyst gets its own copy of the request; results merge into a map
/// keyed by (analyst, ticker), so completion order never matters.
pub struct AnalystScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    workers: Arc<Semaphore>,
}

impl AnalystScheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            config,
            clock,
            workers,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn build_request(
        &self,
        analyst: &dyn Analyst,
        tickers: &[String],
        round: Round,
        context: &RoundContext,
    ) -> AnalysisRequest {
        let inputs = context.inputs.get(analyst.id()).cloned().unwrap_or_default();
        AnalysisRequest {
            request_id: Uuid::new_v4(),
            analyst_id: analyst.id().to_string(),
            role: analyst.role(),
            tickers: inputs.tickers.unwrap_or_else(|| tickers.to_vec()),
            as_of: context.as_of,
            round,
            prior_signals: inputs.prior_signals,
            notifications: inputs.notifications,
            sessions: inputs.sessions,
            pipeline_context: context.pipeline_context.clone(),
            historical_context: inputs.historical_context,
        }
    }

    fn spawn(
        &self,
        analyst: Arc<dyn Analyst>,
        request: AnalysisRequest,
    ) -> JoinHandle<AnalystResult> {
        let workers = Arc::clone(&self.workers);
        let timeout = self.config.analyst_timeout;
        tokio::spawn(async move {
            // The semaphore is never closed.
            let _permit = workers.acquire_owned().await.ok();
            tokio::time::timeout(timeout, analyst.analyze(&request)).await
        })
    }

    /// Run `analysts` over `tickers` for `round`.
    pub async fn run(
        &self,
        analysts: &[Arc<dyn Analyst>],
        tickers: &[String],
        round: Round,
        context: &RoundContext,
    ) -> ScheduleOutcome {
        let start = Instant::now();
        info!(
            analysts = analysts.len(),
            tickers = tickers.len(),
            %round,
            mode = ?self.config.mode,
            "Scheduling analysts"
        );

        let requests: Vec<(Arc<dyn Analyst>, AnalysisRequest)> = analysts
            .iter()
            .map(|a| (Arc::clone(a), self.build_request(a.as_ref(), tickers, round, context)))
            .filter(|(_, req)| !req.tickers.is_empty())
            .collect();

        let mut outcome = ScheduleOutcome::default();

        match self.config.mode {
            ExecutionMode::Sequential => {
                for (analyst, request) in requests {
                    let handle = self.spawn(analyst, request.clone());
                    let joined = handle.await;
                    self.merge(&mut outcome, &request, joined);
                }
            }
            ExecutionMode::Concurrent => {
                let handles: Vec<_> = requests
                    .into_iter()
                    .map(|(analyst, request)| {
                        let handle = self.spawn(analyst, request.clone());
                        (request, handle)
                    })
                    .collect();
                for (request, handle) in handles {
                    let joined = handle.await;
                    self.merge(&mut outcome, &request, joined);
                }
            }
        }

        info!(
            %round,
            signals = outcome.signals.len(),
            failures = outcome.failures.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Round complete"
        );
        outcome
    }

    fn merge(
        &self,
        outcome: &mut ScheduleOutcome,
        request: &AnalysisRequest,
        joined: Result<AnalystResult, tokio::task::JoinError>,
    ) {
        let analyst_id = &request.analyst_id;
        let round = request.round;
        let now = self.clock.now();

        match joined {
            Ok(Ok(Ok(report))) => {
                let AnalysisReport {
                    signals,
                    notification,
                    failures,
                    ..
                } = report;
                for ticker in &request.tickers {
                    match signals.get(ticker) {
                        Some(output) => {
                            let record =
                                SignalRecord::from_output(analyst_id, ticker, output, round, now);
                            outcome.signals.insert(record.key(), record);
                        }
                        None => {
                            let already_reported = failures
                                .iter()
                                .any(|f| f.ticker.as_deref() == Some(ticker.as_str()));
                            if !already_reported {
                                warn!(
                                    analyst = %analyst_id,
                                    ticker = %ticker,
                                    "Analyst returned no signal"
                                );
                                outcome.failures.push(PartialFailure {
                                    analyst_id: analyst_id.clone(),
                                    ticker: Some(ticker.clone()),
                                    round,
                                    kind: FailureKind::Analyst,
                                    message: "no signal returned".to_string(),
                                });
                            }
                        }
                    }
                }
                outcome.failures.extend(failures);
                if let Some(draft) = notification {
                    outcome.notifications.insert(analyst_id.clone(), draft);
                }
            }
            Ok(Ok(Err(e))) => {
                warn!(analyst = %analyst_id, %round, error = %e, "Analyst failed");
                outcome.failures.push(PartialFailure {
                    analyst_id: analyst_id.clone(),
                    ticker: None,
                    round,
                    kind: FailureKind::Analyst,
                    message: e.to_string(),
                });
            }
            Ok(Err(_elapsed)) => {
                let secs = self.config.analyst_timeout.as_secs();
                warn!(analyst = %analyst_id, %round, timeout_secs = secs, "Analyst timed out");
                outcome.failures.push(PartialFailure {
                    analyst_id: analyst_id.clone(),
                    ticker: None,
                    round,
                    kind: FailureKind::Timeout,
                    message: AgentError::Timeout(secs).to_string(),
                });
                // Round 2 keeps the round-1 record instead.
                if round == Round::One {
                    let neutral = SignalOutput::neutral(format!("No answer within {secs}s"));
                    for ticker in &request.tickers {
                        let record =
                            SignalRecord::from_output(analyst_id, ticker, &neutral, round, now);
                        outcome.signals.insert(record.key(), record);
                    }
                }
            }
            Err(e) => {
                error!(analyst = %analyst_id, %round, error = %e, "Analyst task panicked");
                outcome.failures.push(PartialFailure {
                    analyst_id: analyst_id.clone(),
                    ticker: None,
                    round,
                    kind: FailureKind::Analyst,
                    message: format!("task failed: {e}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingAnalyst, PanickingAnalyst, ScriptedAnalyst};
    use chrono::{TimeZone, Utc};
    use quorum_core::{AnalystRole, Signal, VirtualClock};
    use rust_decimal_macros::dec;

    fn tickers() -> Vec<String> {
        vec!["AAPL".to_string(), "MSFT".to_string()]
    }

    fn scheduler(mode: ExecutionMode, timeout: Duration) -> AnalystScheduler {
        let clock = Arc::new(VirtualClock::frozen_at(
            Utc.with_ymd_and_hms(2025, 1, 6, 14, 30, 0).unwrap(),
        ));
        AnalystScheduler::new(
            SchedulerConfig {
                mode,
                max_workers: 2,
                analyst_timeout: timeout,
            },
            clock,
        )
    }

    fn context() -> RoundContext {
        RoundContext::new(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap())
    }

    fn team() -> Vec<Arc<dyn Analyst>> {
        vec![
            Arc::new(
                ScriptedAnalyst::new("fundamentals_analyst", AnalystRole::Fundamentals)
                    .with_signal(Round::One, "AAPL", Signal::Bullish, dec!(70))
                    .with_signal(Round::One, "MSFT", Signal::Bearish, dec!(60)),
            ),
            Arc::new(FailingAnalyst::new("technical_analyst", AnalystRole::Technical)),
            Arc::new(
                ScriptedAnalyst::new("sentiment_analyst", AnalystRole::Sentiment)
                    .with_delay(Duration::from_millis(20)),
            ),
            Arc::new(ScriptedAnalyst::new("valuation_analyst", AnalystRole::Valuation)),
        ]
    }

    #[tokio::test]
    async fn failing_analyst_does_not_cancel_siblings() {
        let outcome = scheduler(ExecutionMode::Concurrent, Duration::from_secs(5))
            .run(&team(), &tickers(), Round::One, &context())
            .await;

        assert_eq!(outcome.signals.len(), 6);
        for analyst in ["fundamentals_analyst", "sentiment_analyst", "valuation_analyst"] {
            for ticker in tickers() {
                assert!(outcome.signals.contains_key(&SignalKey::new(analyst, ticker)));
            }
        }
        assert!(!outcome.signals.contains_key(&SignalKey::new("technical_analyst", "AAPL")));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].analyst_id, "technical_analyst");
    }

    #[tokio::test]
    async fn sequential_and_concurrent_agree() {
        let seq = scheduler(ExecutionMode::Sequential, Duration::from_secs(5))
            .run(&team(), &tickers(), Round::One, &context())
            .await;
        let con = scheduler(ExecutionMode::Concurrent, Duration::from_secs(5))
            .run(&team(), &tickers(), Round::One, &context())
            .await;
        assert_eq!(seq.signals, con.signals);
        assert_eq!(seq.failures, con.failures);
    }

    #[tokio::test]
    async fn timeout_substitutes_neutral_in_round_one() {
        let slow: Vec<Arc<dyn Analyst>> = vec![Arc::new(
            ScriptedAnalyst::new("sentiment_analyst", AnalystRole::Sentiment)
                .with_signal(Round::One, "AAPL", Signal::Bearish, dec!(80))
                .with_delay(Duration::from_millis(500)),
        )];
        let outcome = scheduler(ExecutionMode::Concurrent, Duration::from_millis(50))
            .run(&slow, &tickers(), Round::One, &context())
            .await;

        let record = &outcome.signals[&SignalKey::new("sentiment_analyst", "AAPL")];
        assert_eq!(record.signal, Signal::Neutral);
        assert_eq!(record.confidence, dec!(50));
        assert_eq!(outcome.failures[0].kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn timeout_in_round_two_leaves_pair_absent() {
        let slow: Vec<Arc<dyn Analyst>> = vec![Arc::new(
            ScriptedAnalyst::new("sentiment_analyst", AnalystRole::Sentiment)
                .with_delay(Duration::from_millis(500)),
        )];
        let outcome = scheduler(ExecutionMode::Sequential, Duration::from_millis(50))
            .run(&slow, &tickers(), Round::Two, &context())
            .await;
        assert!(outcome.signals.is_empty());
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn panicking_analyst_is_recorded() {
        let analysts: Vec<Arc<dyn Analyst>> = vec![
            Arc::new(PanickingAnalyst::new("technical_analyst", AnalystRole::Technical)),
            Arc::new(ScriptedAnalyst::new("valuation_analyst", AnalystRole::Valuation)),
        ];
        let outcome = scheduler(ExecutionMode::Concurrent, Duration::from_secs(5))
            .run(&analysts, &tickers(), Round::One, &context())
            .await;
        assert_eq!(outcome.signals.len(), 2);
        assert_eq!(outcome.failures[0].kind, FailureKind::Analyst);
    }

    #[tokio::test]
    async fn per_analyst_ticker_restriction() {
        let mut ctx = context();
        ctx.inputs.insert(
            "valuation_analyst".to_string(),
            AnalystInputs {
                tickers: Some(vec!["MSFT".to_string()]),
                ..Default::default()
            },
        );
        ctx.inputs.insert(
            "fundamentals_analyst".to_string(),
            AnalystInputs {
                tickers: Some(vec![]),
                ..Default::default()
            },
        );
        let analysts: Vec<Arc<dyn Analyst>> = vec![
            Arc::new(ScriptedAnalyst::new("valuation_analyst", AnalystRole::Valuation)),
            Arc::new(ScriptedAnalyst::new("fundamentals_analyst", AnalystRole::Fundamentals)),
        ];
        let outcome = scheduler(ExecutionMode::Concurrent, Duration::from_secs(5))
            .run(&analysts, &tickers(), Round::Two, &ctx)
            .await;
        assert_eq!(
            outcome.signals.keys().cloned().collect::<Vec<_>>(),
            vec![SignalKey::new("valuation_analyst", "MSFT")]
        );
    }

    #[tokio::test]
    async fn notification_drafts_are_collected() {
        let analysts: Vec<Arc<dyn Analyst>> = vec![Arc::new(
            ScriptedAnalyst::new("sentiment_analyst", AnalystRole::Sentiment).with_notification(
                "Negative press on AAPL",
                quorum_core::Urgency::High,
                quorum_core::Category::RiskWarning,
            ),
        )];
        let outcome = scheduler(ExecutionMode::Concurrent, Duration::from_secs(5))
            .run(&analysts, &tickers(), Round::One, &context())
            .await;
        assert_eq!(
            outcome.notifications["sentiment_analyst"].urgency,
            quorum_core::Urgency::High
        );
    }
}
