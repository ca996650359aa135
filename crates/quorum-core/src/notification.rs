use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How urgently recipients should consider a notification.
///
/// Ordered so that `Urgency::High < Urgency::Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// High and critical notifications make the recipient eligible for signal revision.
    pub fn is_escalated(self) -> bool {
        self >= Urgency::High
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MarketAlert,
    RiskWarning,
    Opportunity,
    PolicyUpdate,
    General,
}

/// A broadcast message from one agent to every other registered agent.
///
/// Immutable once created; memories hold it behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub sender_agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub urgency: Urgency,
    pub category: Category,
}

/// An analyst's decision to broadcast, produced by its post-analysis step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationDraft {
    pub content: String,
    pub urgency: Urgency,
    pub category: Category,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_ordering() {
        assert!(Urgency::Low < Urgency::Medium);
        assert!(Urgency::High < Urgency::Critical);
        assert!(Urgency::High.is_escalated());
        assert!(Urgency::Critical.is_escalated());
        assert!(!Urgency::Medium.is_escalated());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::RiskWarning).unwrap();
        assert_eq!(json, "\"risk_warning\"");
        let parsed: Category = serde_json::from_str("\"policy_update\"").unwrap();
        assert_eq!(parsed, Category::PolicyUpdate);
    }
}
