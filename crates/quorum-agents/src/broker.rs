use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use quorum_core::{Category, Clock, Notification, NotificationDraft, Urgency};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AgentError;
use crate::memory::AgentMemory;

/// Registry of agent memories. One instance per run, passed explicitly to
/// whoever needs it.
///
/// Every mutation happens under the single map lock, so a broadcast is
/// visible to all recipients at once or to none.
#[derive(Debug)]
pub struct NotificationBroker {
    clock: Arc<dyn Clock>,
    memories: Mutex<HashMap<String, AgentMemory>>,
}

impl NotificationBroker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            memories: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AgentMemory>> {
        // Every mutation is a single push or retain; a poisoned map is still consistent.
        self.memories.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an agent. Registering twice keeps the existing memory.
    pub fn register(&self, agent_id: &str) {
        let mut memories = self.lock();
        if !memories.contains_key(agent_id) {
            memories.insert(agent_id.to_string(), AgentMemory::new(agent_id));
            debug!(agent = agent_id, "Registered agent");
        }
    }

    pub fn registered_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.lock().keys().cloned().collect();
        agents.sort();
        agents
    }

    /// Broadcast to every registered agent except the sender.
    pub fn broadcast(
        &self,
        sender_id: &str,
        content: &str,
        urgency: Urgency,
        category: Category,
    ) -> Result<Uuid, AgentError> {
        let draft = NotificationDraft {
            content: content.to_string(),
            urgency,
            category,
        };
        Ok(self.publish(sender_id, &draft)?.id)
    }

    /// Like [`broadcast`](Self::broadcast), returning the delivered notification.
    pub fn publish(
        &self,
        sender_id: &str,
        draft: &NotificationDraft,
    ) -> Result<Arc<Notification>, AgentError> {
        let mut memories = self.lock();
        if !memories.contains_key(sender_id) {
            return Err(AgentError::Configuration(format!(
                "unregistered sender: {sender_id}"
            )));
        }

        let notification = Arc::new(Notification {
            id: Uuid::new_v4(),
            sender_agent_id: sender_id.to_string(),
            timestamp: self.clock.now(),
            content: draft.content.clone(),
            urgency: draft.urgency,
            category: draft.category,
        });

        let mut recipients = 0usize;
        for (agent_id, memory) in memories.iter_mut() {
            if agent_id == sender_id {
                memory.record_authored(Arc::clone(&notification));
            } else {
                memory.append(Arc::clone(&notification));
                recipients += 1;
            }
        }

        info!(
            sender = sender_id,
            urgency = ?notification.urgency,
            category = ?notification.category,
            recipients,
            "Notification broadcast"
        );
        Ok(notification)
    }

    /// A point-in-time copy of an agent's memory.
    pub fn get_memory(&self, agent_id: &str) -> Result<AgentMemory, AgentError> {
        self.lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::Configuration(format!("unregistered agent: {agent_id}")))
    }

    /// Apply the retention policy to every memory. Returns entries removed.
    pub fn prune(&self, older_than_days: i64) -> usize {
        let now = self.clock.now();
        let removed: usize = self
            .lock()
            .values_mut()
            .map(|memory| memory.prune(older_than_days, now))
            .sum();
        if removed > 0 {
            debug!(removed, older_than_days, "Pruned notifications");
        }
        removed
    }
}
