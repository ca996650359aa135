//! Scripted collaborators for exercising the scheduler, communication engine
//! and day cycle without a language model.
//!
//! `ScriptedAnalyst` answers from a per-round table of signals; tickers it has
//! no entry for get a neutral call, and round 2 defaults to "considered but
//! unchanged" when a prior signal was supplied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use quorum_core::{
    AnalysisReport, AnalysisRequest, AnalystRole, Category, ConversationTurn, NotificationDraft,
    Round, Signal, SignalOutput, ToolOutput, TurnReply, Urgency,
};
use rust_decimal::Decimal;

use crate::analyst::Analyst;
use crate::error::AgentError;
use crate::llm::LanguageModel;
use crate::tools::AnalysisTool;

/// An analyst with canned answers.
pub struct ScriptedAnalyst {
    id: String,
    role: AnalystRole,
    signals: HashMap<(Round, String), SignalOutput>,
    notification: Option<NotificationDraft>,
    delay: Option<Duration>,
    wants_another_turn: bool,
    failing_turns: bool,
    analyze_calls: AtomicUsize,
    turns: AtomicUsize,
    requests: Mutex<Vec<AnalysisRequest>>,
    seen_turns: Mutex<Vec<ConversationTurn>>,
}

impl ScriptedAnalyst {
    pub fn new(id: &str, role: AnalystRole) -> Self {
        Self {
            id: id.to_string(),
            role,
            signals: HashMap::new(),
            notification: None,
            delay: None,
            wants_another_turn: false,
            failing_turns: false,
            analyze_calls: AtomicUsize::new(0),
            turns: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            seen_turns: Mutex::new(Vec::new()),
        }
    }

    pub fn with_signal(
        mut self,
        round: Round,
        ticker: &str,
        signal: Signal,
        confidence: Decimal,
    ) -> Self {
        self.signals.insert(
            (round, ticker.to_string()),
            SignalOutput {
                signal,
                confidence,
                reasoning: format!("{} scripted {signal} on {ticker}", self.id),
                signal_adjustment: None,
            },
        );
        self
    }

    /// A round-2 answer with an explicit `signal_adjustment` flag.
    pub fn with_revision(
        mut self,
        ticker: &str,
        signal: Signal,
        confidence: Decimal,
        signal_adjustment: Option<bool>,
    ) -> Self {
        self.signals.insert(
            (Round::Two, ticker.to_string()),
            SignalOutput {
                signal,
                confidence,
                reasoning: format!("{} revised {ticker} to {signal}", self.id),
                signal_adjustment,
            },
        );
        self
    }

    pub fn with_notification(
        mut self,
        content: &str,
        urgency: Urgency,
        category: Category,
    ) -> Self {
        self.notification = Some(NotificationDraft {
            content: content.to_string(),
            urgency,
            category,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every turn asks for another one.
    pub fn always_wants_another_turn(mut self) -> Self {
        self.wants_another_turn = true;
        self
    }

    /// Every conversation turn errors.
    pub fn with_failing_turns(mut self) -> Self {
        self.failing_turns = true;
        self
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn turns_taken(&self) -> usize {
        self.turns.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn seen_turns(&self) -> Vec<ConversationTurn> {
        self.seen_turns.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Analyst for ScriptedAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> AnalystRole {
        self.role
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport, AgentError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut report = AnalysisReport::new(&self.id);
        for ticker in &request.tickers {
            let scripted = self.signals.get(&(request.round, ticker.clone())).cloned();
            let output = match (request.round, scripted) {
                (_, Some(output)) => output,
                (Round::Two, None) => match request.prior_signals.get(ticker) {
                    Some(prior) => SignalOutput {
                        signal: prior.signal,
                        confidence: prior.confidence,
                        reasoning: prior.reasoning.clone(),
                        signal_adjustment: Some(false),
                    },
                    None => SignalOutput::neutral("no view"),
                },
                (Round::One, None) => SignalOutput::neutral("no view"),
            };
            report.signals.insert(ticker.clone(), output);
        }
        if request.round == Round::One {
            report.notification = self.notification.clone();
        }
        Ok(report)
    }

    async fn converse(&self, turn: &ConversationTurn) -> Result<TurnReply, AgentError> {
        self.turns.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_turns.lock() {
            seen.push(turn.clone());
        }
        if self.failing_turns {
            return Err(AgentError::Llm("scripted turn failure".to_string()));
        }
        Ok(TurnReply {
            content: format!(
                "{} on {} (cycle {})",
                self.id,
                turn.tickers.join(","),
                turn.cycle
            ),
            wants_another_turn: self.wants_another_turn,
        })
    }
}

/// An analyst whose every call errors.
pub struct FailingAnalyst {
    id: String,
    role: AnalystRole,
}

impl FailingAnalyst {
    pub fn new(id: &str, role: AnalystRole) -> Self {
        Self {
            id: id.to_string(),
            role,
        }
    }
}

#[async_trait]
impl Analyst for FailingAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> AnalystRole {
        self.role
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisReport, AgentError> {
        Err(AgentError::Tool(format!("{} always fails", self.id)))
    }

    async fn converse(&self, _turn: &ConversationTurn) -> Result<TurnReply, AgentError> {
        Err(AgentError::Tool(format!("{} always fails", self.id)))
    }
}

/// An analyst that panics inside `analyze`.
pub struct PanickingAnalyst {
    id: String,
    role: AnalystRole,
}

impl PanickingAnalyst {
    pub fn new(id: &str, role: AnalystRole) -> Self {
        Self {
            id: id.to_string(),
            role,
        }
    }
}

#[async_trait]
impl Analyst for PanickingAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> AnalystRole {
        self.role
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisReport, AgentError> {
        panic!("{} panicked", self.id);
    }

    async fn converse(&self, _turn: &ConversationTurn) -> Result<TurnReply, AgentError> {
        panic!("{} panicked", self.id);
    }
}

type Responder = dyn Fn(&str, &str) -> Result<String, AgentError> + Send + Sync;

/// A language model answering through a closure over `(system, prompt)`.
pub struct ScriptedLanguageModel {
    responder: Box<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLanguageModel {
    pub fn new(
        responder: impl Fn(&str, &str) -> Result<String, AgentError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_, _| Err(AgentError::Llm("scripted model failure".to_string())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        (self.responder)(system, prompt)
    }
}

/// A tool returning a fixed score, or always failing.
pub struct StaticTool {
    name: String,
    score: Option<f64>,
}

impl StaticTool {
    pub fn new(name: &str, score: f64) -> Self {
        Self {
            name: name.to_string(),
            score: Some(score),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            score: None,
        }
    }
}

#[async_trait]
impl AnalysisTool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ticker: &str, as_of: NaiveDate) -> Result<ToolOutput, AgentError> {
        match self.score {
            Some(score) => Ok(ToolOutput {
                tool: self.name.clone(),
                metric: format!("{}_score", self.name),
                score,
                rationale: format!("static {} for {ticker} on {as_of}", self.name),
            }),
            None => Err(AgentError::Tool(format!("{} unavailable", self.name))),
        }
    }
}
