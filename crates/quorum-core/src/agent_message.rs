use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notification::{Notification, NotificationDraft};
use crate::session::{CommunicationSession, SessionKind, SessionMessage};
use crate::signal::{PartialFailure, Round, SignalOutput, SignalRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnalystRole {
    Fundamentals,
    Technical,
    Sentiment,
    Valuation,
}

impl AnalystRole {
    pub const ALL: [AnalystRole; 4] = [
        AnalystRole::Fundamentals,
        AnalystRole::Technical,
        AnalystRole::Sentiment,
        AnalystRole::Valuation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalystRole::Fundamentals => "fundamentals",
            AnalystRole::Technical => "technical",
            AnalystRole::Sentiment => "sentiment",
            AnalystRole::Valuation => "valuation",
        }
    }

    /// Conventional agent id for the role, e.g. `technical_analyst`.
    pub fn default_agent_id(self) -> String {
        format!("{}_analyst", self.as_str())
    }
}

impl fmt::Display for AnalystRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one analysis tool for one ticker and date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub tool: String,
    pub metric: String,
    pub score: f64,
    pub rationale: String,
}

/// Input handed to an analyst for one round.
///
/// Each analyst task receives its own copy; nothing in here is shared mutably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub request_id: Uuid,
    pub analyst_id: String,
    pub role: AnalystRole,
    pub tickers: Vec<String>,
    pub as_of: NaiveDate,
    pub round: Round,
    /// Round-1 records, keyed by ticker. Empty in round 1.
    #[serde(default)]
    pub prior_signals: BTreeMap<String, SignalRecord>,
    /// Notifications the analyst consumed since round 1.
    #[serde(default)]
    pub notifications: Vec<Notification>,
    /// Sessions the analyst took part in.
    #[serde(default)]
    pub sessions: Vec<CommunicationSession>,
    /// Opaque outlook/strategy payload supplied by the caller.
    #[serde(default)]
    pub pipeline_context: BTreeMap<String, serde_json::Value>,
    /// Snippets recalled from long-term memory.
    #[serde(default)]
    pub historical_context: Vec<String>,
}

/// What an analyst returns for a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub analyst_id: String,
    /// Keyed by ticker.
    pub signals: BTreeMap<String, SignalOutput>,
    /// Set when the analyst decided to broadcast.
    pub notification: Option<NotificationDraft>,
    /// Failures the analyst recovered from internally.
    #[serde(default)]
    pub failures: Vec<PartialFailure>,
}

impl AnalysisReport {
    pub fn new(analyst_id: impl Into<String>) -> Self {
        Self {
            analyst_id: analyst_id.into(),
            signals: BTreeMap::new(),
            notification: None,
            failures: Vec::new(),
        }
    }
}

/// Context for one participant's turn in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub session_id: Uuid,
    pub kind: SessionKind,
    pub speaker: String,
    pub participants: Vec<String>,
    pub tickers: Vec<String>,
    /// 1-based cycle number.
    pub cycle: u32,
    /// The speaker's round-1 records for the session tickers.
    pub own_signals: BTreeMap<String, SignalRecord>,
    pub recent_notifications: Vec<Notification>,
    /// Everything said in the session so far.
    pub transcript: Vec<SessionMessage>,
    #[serde(default)]
    pub historical_context: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnReply {
    pub content: String,
    #[serde(default)]
    pub wants_another_turn: bool,
}
