use std::sync::Arc;

use async_trait::async_trait;
use quorum_core::{
    AnalysisReport, AnalysisRequest, AnalystRole, ConversationTurn, FailureKind, NotificationDraft,
    PartialFailure, Round, SignalOutput, ToolOutput, TurnReply, VerdictSource,
};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::llm::LanguageModel;
use crate::parser::{parse_notification_decision, parse_signal_output, parse_turn_reply};
use crate::prompts::{
    analyst_system_prompt, conversation_prompt, conversation_system_prompt, notify_prompt,
    notify_system_prompt, revision_prompt, signal_prompt,
};
use crate::tools::AnalysisTool;

/// One member of the analyst team. Mockable for testing.
#[async_trait]
pub trait Analyst: Send + Sync {
    fn id(&self) -> &str;
    fn role(&self) -> AnalystRole;

    /// Produce a signal per requested ticker, plus an optional broadcast.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport, AgentError>;

    /// Take one turn in a communication session.
    async fn converse(&self, turn: &ConversationTurn) -> Result<TurnReply, AgentError>;
}

/// An analyst that runs its tools and asks a language model for the call.
pub struct LlmAnalyst {
    id: String,
    role: AnalystRole,
    llm: Arc<dyn LanguageModel>,
    tools: Vec<Arc<dyn AnalysisTool>>,
}

impl LlmAnalyst {
    pub fn new(
        id: impl Into<String>,
        role: AnalystRole,
        llm: Arc<dyn LanguageModel>,
        tools: Vec<Arc<dyn AnalysisTool>>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            llm,
            tools,
        }
    }

    /// Run every tool; failed tools are reported and skipped.
    async fn run_tools(
        &self,
        request: &AnalysisRequest,
        ticker: &str,
        failures: &mut Vec<PartialFailure>,
    ) -> Vec<ToolOutput> {
        let mut outputs = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            match tool.run(ticker, request.as_of).await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    warn!(
                        analyst = %self.id,
                        tool = tool.name(),
                        ticker,
                        error = %e,
                        "Tool failed"
                    );
                    failures.push(PartialFailure {
                        analyst_id: self.id.clone(),
                        ticker: Some(ticker.to_string()),
                        round: request.round,
                        kind: FailureKind::Tool,
                        message: e.to_string(),
                    });
                }
            }
        }
        outputs
    }

    async fn decide_notification(&self, report: &AnalysisReport) -> Option<NotificationDraft> {
        let signals: Vec<(&str, &SignalOutput)> = report
            .signals
            .iter()
            .map(|(ticker, output)| (ticker.as_str(), output))
            .collect();
        if signals.is_empty() {
            return None;
        }

        let raw = match self
            .llm
            .complete(&notify_system_prompt(), &notify_prompt(&self.id, &signals))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(analyst = %self.id, error = %e, "Notify decision failed");
                return None;
            }
        };

        match parse_notification_decision(&raw) {
            Ok(draft) => draft,
            Err(e) => {
                debug!(
                    analyst = %self.id,
                    error = %e,
                    "Unparseable notify decision, staying silent"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Analyst for LlmAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> AnalystRole {
        self.role
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport, AgentError> {
        let mut report = AnalysisReport::new(&self.id);
        let system = analyst_system_prompt(self.role);

        for ticker in &request.tickers {
            let tools = self.run_tools(request, ticker, &mut report.failures).await;
            let prompt = match request.round {
                Round::One => signal_prompt(request, ticker, &tools),
                Round::Two => {
                    revision_prompt(request, ticker, &tools, request.prior_signals.get(ticker))
                }
            };

            match self.llm.complete(&system, &prompt).await {
                Ok(raw) => {
                    let (output, source) = parse_signal_output(&raw);
                    if source != VerdictSource::Structured {
                        warn!(
                            analyst = %self.id,
                            ticker = %ticker,
                            ?source,
                            "Unstructured signal response"
                        );
                        report.failures.push(PartialFailure {
                            analyst_id: self.id.clone(),
                            ticker: Some(ticker.clone()),
                            round: request.round,
                            kind: FailureKind::Parse,
                            message: format!("signal recovered via {source:?}"),
                        });
                    }
                    report.signals.insert(ticker.clone(), output);
                }
                Err(e) => {
                    warn!(analyst = %self.id, ticker = %ticker, error = %e, "Model call failed");
                    report.failures.push(PartialFailure {
                        analyst_id: self.id.clone(),
                        ticker: Some(ticker.clone()),
                        round: request.round,
                        kind: e.failure_kind(),
                        message: e.to_string(),
                    });
                    // Round 2 leaves the round-1 record authoritative.
                    if request.round == Round::One {
                        report.signals.insert(
                            ticker.clone(),
                            SignalOutput::neutral(format!("Model unavailable: {e}")),
                        );
                    }
                }
            }
        }

        if request.round == Round::One {
            report.notification = self.decide_notification(&report).await;
        }

        Ok(report)
    }

    async fn converse(&self, turn: &ConversationTurn) -> Result<TurnReply, AgentError> {
        let raw = self
            .llm
            .complete(
                &conversation_system_prompt(self.role),
                &conversation_prompt(turn),
            )
            .await?;
        Ok(parse_turn_reply(&raw))
    }
}
