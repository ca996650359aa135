use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use quorum_core::{Notification, Urgency};

/// One agent's notification log.
///
/// Received and authored notifications are kept apart; the read operations
/// only see what the agent received. Entries are shared `Arc`s, so a broadcast
/// to N agents stores one notification.
#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    agent_id: String,
    received: Vec<Arc<Notification>>,
    authored: Vec<Arc<Notification>>,
}

impl AgentMemory {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            received: Vec::new(),
            authored: Vec::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Append a received notification.
    pub fn append(&mut self, notification: Arc<Notification>) {
        self.received.push(notification);
    }

    pub(crate) fn record_authored(&mut self, notification: Arc<Notification>) {
        self.authored.push(notification);
    }

    /// Received notifications no older than `window_seconds` before `now`, in arrival order.
    pub fn recent(&self, window_seconds: u64, now: DateTime<Utc>) -> Vec<Notification> {
        let cutoff = i64::try_from(window_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window));
        self.received
            .iter()
            .filter(|n| cutoff.map_or(true, |c| n.timestamp >= c))
            .map(|n| Notification::clone(n))
            .collect()
    }

    /// Received notifications with exactly this urgency, in arrival order.
    pub fn by_urgency(&self, level: Urgency) -> Vec<Notification> {
        self.received
            .iter()
            .filter(|n| n.urgency == level)
            .map(|n| Notification::clone(n))
            .collect()
    }

    /// Received notifications stamped at or after `instant`.
    pub fn since(&self, instant: DateTime<Utc>) -> Vec<Notification> {
        self.received
            .iter()
            .filter(|n| n.timestamp >= instant)
            .map(|n| Notification::clone(n))
            .collect()
    }

    pub fn authored(&self) -> Vec<Notification> {
        self.authored.iter().map(|n| Notification::clone(n)).collect()
    }

    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// Drop every notification older than `older_than_days` before `now`.
    /// Returns how many received entries were removed.
    pub fn prune(&mut self, older_than_days: i64, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = Duration::try_days(older_than_days)
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };
        let before = self.received.len();
        self.received.retain(|n| n.timestamp >= cutoff);
        self.authored.retain(|n| n.timestamp >= cutoff);
        before - self.received.len()
    }
}
