use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::SignalKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Exactly two participants.
    PrivateChat,
    /// Two or more participants sharing one transcript.
    Meeting,
}

impl SessionKind {
    pub fn accepts(self, participants: usize) -> bool {
        match self {
            SessionKind::PrivateChat => participants == 2,
            SessionKind::Meeting => participants >= 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMessage {
    pub speaker: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Why a session closed. Hitting the cycle ceiling is a normal outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionTermination {
    /// No participant asked for another turn.
    Consensus,
    /// `max_cycles` cycles elapsed.
    MaxCycles,
}

/// A bounded multi-turn exchange between analysts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicationSession {
    pub id: Uuid,
    pub kind: SessionKind,
    pub participants: Vec<String>,
    /// Tickers whose signal keys this session touches.
    pub topic_tickers: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub messages: Vec<SessionMessage>,
    pub is_live: bool,
    pub cycles_run: u32,
    pub termination: Option<SessionTermination>,
}

impl CommunicationSession {
    pub fn open(
        kind: SessionKind,
        participants: Vec<String>,
        topic_tickers: Vec<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            participants,
            topic_tickers,
            start_time,
            end_time: None,
            messages: Vec::new(),
            is_live: true,
            cycles_run: 0,
            termination: None,
        }
    }

    /// Append a message. Closed sessions are immutable; returns false if ignored.
    pub fn push_message(&mut self, speaker: &str, content: String, at: DateTime<Utc>) -> bool {
        if !self.is_live {
            return false;
        }
        self.messages.push(SessionMessage {
            speaker: speaker.to_string(),
            content,
            timestamp: at,
        });
        true
    }

    /// Close the session. `end_time` is only ever set once.
    pub fn close(&mut self, termination: SessionTermination, at: DateTime<Utc>) -> bool {
        if self.end_time.is_some() {
            return false;
        }
        self.end_time = Some(at);
        self.is_live = false;
        self.termination = Some(termination);
        true
    }

    /// Every (participant, ticker) signal key this session touches.
    pub fn touched_keys(&self) -> BTreeSet<SignalKey> {
        self.participants
            .iter()
            .flat_map(|p| {
                self.topic_tickers
                    .iter()
                    .map(move |t| SignalKey::new(p.clone(), t.clone()))
            })
            .collect()
    }

    pub fn involves(&self, analyst_id: &str) -> bool {
        self.participants.iter().any(|p| p == analyst_id)
    }
}

/// A session asked for from outside the engine's own planning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRequest {
    pub kind: SessionKind,
    pub participants: Vec<String>,
    pub tickers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat() -> CommunicationSession {
        CommunicationSession::open(
            SessionKind::PrivateChat,
            vec!["fundamentals".to_string(), "sentiment".to_string()],
            vec!["AAPL".to_string()],
            Utc::now(),
        )
    }

    #[test]
    fn kind_participant_rules() {
        assert!(SessionKind::PrivateChat.accepts(2));
        assert!(!SessionKind::PrivateChat.accepts(3));
        assert!(SessionKind::Meeting.accepts(4));
        assert!(!SessionKind::Meeting.accepts(1));
    }

    #[test]
    fn close_sets_end_time_once() {
        let mut session = chat();
        let first = Utc::now();
        assert!(session.close(SessionTermination::Consensus, first));
        assert!(!session.close(SessionTermination::MaxCycles, Utc::now()));
        assert_eq!(session.end_time, Some(first));
        assert_eq!(session.termination, Some(SessionTermination::Consensus));
        assert!(!session.push_message("sentiment", "late".to_string(), Utc::now()));
        assert!(session.messages.is_empty());
    }

    #[test]
    fn touched_keys_cover_participants_and_tickers() {
        let session = chat();
        let keys = session.touched_keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&SignalKey::new("fundamentals", "AAPL")));
        assert!(keys.contains(&SignalKey::new("sentiment", "AAPL")));
    }
}
