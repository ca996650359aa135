use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A directional call on a ticker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Bullish,
    Bearish,
    Neutral,
}

impl Signal {
    /// +1 for bullish, -1 for bearish, 0 for neutral.
    pub fn direction(self) -> i32 {
        match self {
            Signal::Bullish => 1,
            Signal::Bearish => -1,
            Signal::Neutral => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Bullish => "bullish",
            Signal::Bearish => "bearish",
            Signal::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis round within a trading day. Serialized as `1` or `2`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Round {
    One,
    Two,
}

impl From<Round> for u8 {
    fn from(round: Round) -> Self {
        match round {
            Round::One => 1,
            Round::Two => 2,
        }
    }
}

impl TryFrom<u8> for Round {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Round::One),
            2 => Ok(Round::Two),
            other => Err(format!("invalid round: {other}")),
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Identity of a signal within a day: one analyst's view of one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalKey {
    pub analyst_id: String,
    pub ticker: String,
}

impl SignalKey {
    pub fn new(analyst_id: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            analyst_id: analyst_id.into(),
            ticker: ticker.into(),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.analyst_id, self.ticker)
    }
}

/// One analyst's signal for one ticker in one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRecord {
    pub analyst_id: String,
    pub ticker: String,
    pub signal: Signal,
    /// 0 to 100.
    pub confidence: Decimal,
    pub reasoning: String,
    pub round: Round,
    /// True only when a round-2 record is an explicit revision.
    #[serde(default)]
    pub signal_adjustment: bool,
    pub created_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn key(&self) -> SignalKey {
        SignalKey::new(&self.analyst_id, &self.ticker)
    }

    /// Build a record from a parsed analyst output.
    pub fn from_output(
        analyst_id: &str,
        ticker: &str,
        output: &SignalOutput,
        round: Round,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            analyst_id: analyst_id.to_string(),
            ticker: ticker.to_string(),
            signal: output.signal,
            confidence: clamp_confidence(output.confidence),
            reasoning: output.reasoning.clone(),
            round,
            signal_adjustment: round == Round::Two && output.signal_adjustment == Some(true),
            created_at,
        }
    }

    /// The round-2 copy stored when an analyst reconsidered but did not adjust.
    pub fn unchanged_revision(&self, created_at: DateTime<Utc>) -> Self {
        Self {
            round: Round::Two,
            signal_adjustment: false,
            created_at,
            ..self.clone()
        }
    }

    pub fn same_call(&self, other: &SignalRecord) -> bool {
        self.signal == other.signal
            && self.confidence == other.confidence
            && self.reasoning == other.reasoning
    }
}

/// The structured shape an analyst's reasoning step is expected to produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalOutput {
    pub signal: Signal,
    pub confidence: Decimal,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_adjustment: Option<bool>,
}

impl SignalOutput {
    pub fn neutral(reasoning: impl Into<String>) -> Self {
        Self {
            signal: Signal::Neutral,
            confidence: Decimal::from(50),
            reasoning: reasoning.into(),
            signal_adjustment: None,
        }
    }
}

/// Where a parsed [`SignalOutput`] came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Valid structured JSON.
    Structured,
    /// Keyword extraction over free text.
    RuleFallback,
    /// Nothing usable; neutral default substituted.
    NeutralDefault,
}

pub fn clamp_confidence(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An analysis tool or LLM call failed.
    Tool,
    /// LLM output was not valid structured data.
    Parse,
    /// The analyst did not answer within its deadline.
    Timeout,
    /// The analyst itself errored or panicked.
    Analyst,
    /// A conversation turn failed.
    Session,
}

/// A recovered failure, surfaced to the timeline but never fatal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartialFailure {
    pub analyst_id: String,
    pub ticker: Option<String>,
    pub round: Round,
    pub kind: FailureKind,
    pub message: String,
}
