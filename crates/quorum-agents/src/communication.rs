//! Communication phase: broadcasts, private chats and meetings between round 1
//! and round 2, then the contextual revision of the affected signals.
//!
//! Sessions are planned from round-1 disagreement, run turn by turn, and
//! bounded by `max_cycles`. Sessions whose signal keys are disjoint run
//! concurrently; overlapping ones go to a later batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quorum_core::{
    Clock, CommunicationConfig, CommunicationSession, ConversationTurn, EventRecorder, EventType,
    FailureKind, Notification, NotificationDraft, PartialFailure, Round, SessionKind,
    SessionRequest, SessionTermination, Signal, SignalKey, SignalRecord,
};
use quorum_store::MemoryBackend;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::analyst::Analyst;
use crate::broker::NotificationBroker;
use crate::error::AgentError;
use crate::scheduler::{AnalystInputs, AnalystScheduler, RoundContext};
use crate::signal_store::SignalStore;

/// A session to run: who talks, about which tickers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub kind: SessionKind,
    pub participants: Vec<String>,
    pub tickers: Vec<String>,
}

impl SessionPlan {
    pub fn touched_keys(&self) -> BTreeSet<SignalKey> {
        self.participants
            .iter()
            .flat_map(|p| self.tickers.iter().map(move |t| SignalKey::new(p.clone(), t.clone())))
            .collect()
    }
}

impl From<&SessionRequest> for SessionPlan {
    fn from(request: &SessionRequest) -> Self {
        Self {
            kind: request.kind,
            participants: request.participants.clone(),
            tickers: request.tickers.clone(),
        }
    }
}

/// What the communication phase produced.
#[derive(Debug, Clone, Default)]
pub struct CommunicationOutcome {
    pub sessions: Vec<CommunicationSession>,
    /// Round-2 records stored, in key order.
    pub revised: Vec<SignalRecord>,
    pub failures: Vec<PartialFailure>,
}

struct Participant {
    analyst: Arc<dyn Analyst>,
    own_signals: BTreeMap<String, SignalRecord>,
    history: Vec<String>,
}

struct SessionTask {
    plan: SessionPlan,
    participants: Vec<Participant>,
    broker: Arc<NotificationBroker>,
    clock: Arc<dyn Clock>,
    recorder: EventRecorder,
    max_cycles: u32,
    recent_window_seconds: u64,
}

pub struct CommunicationEngine {
    config: CommunicationConfig,
    broker: Arc<NotificationBroker>,
    clock: Arc<dyn Clock>,
    memory: Option<Arc<dyn MemoryBackend>>,
    memory_top_k: usize,
}

impl CommunicationEngine {
    pub fn new(
        config: CommunicationConfig,
        broker: Arc<NotificationBroker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            broker,
            clock,
            memory: None,
            memory_top_k: 0,
        }
    }

    /// Seed prompts with up to `top_k` snippets from long-term memory.
    pub fn with_memory(mut self, backend: Arc<dyn MemoryBackend>, top_k: usize) -> Self {
        self.memory = Some(backend);
        self.memory_top_k = top_k;
        self
    }

    pub fn config(&self) -> &CommunicationConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<NotificationBroker> {
        &self.broker
    }

    /// Broadcast analysts' drafts in sender order. Stops at the first draft
    /// whose sender the broker does not know.
    pub fn publish(
        &self,
        drafts: &BTreeMap<String, NotificationDraft>,
        recorder: &EventRecorder,
    ) -> Result<Vec<Arc<Notification>>, AgentError> {
        let mut delivered = Vec::with_capacity(drafts.len());
        for (sender, draft) in drafts {
            let notification = self.broker.publish(sender, draft).map_err(|e| {
                error!(sender = %sender, error = %e, "Broadcast rejected");
                e
            })?;
            recorder.record(
                EventType::Notification,
                serde_json::to_value(notification.as_ref()).unwrap_or_default(),
            );
            recorder.record(
                EventType::AgentMessage,
                json!({
                    "agent_id": sender,
                    "content": notification.content,
                    "urgency": notification.urgency,
                    "category": notification.category,
                }),
            );
            delivered.push(notification);
        }
        Ok(delivered)
    }

    /// Plan sessions from round-1 disagreement plus explicit requests.
    pub fn plan_sessions(
        &self,
        store: &SignalStore,
        requests: &[SessionRequest],
    ) -> Vec<SessionPlan> {
        let mut plans: Vec<SessionPlan> = Vec::new();

        for request in requests {
            let unique: BTreeSet<&String> = request.participants.iter().collect();
            if unique.len() != request.participants.len()
                || !request.kind.accepts(request.participants.len())
                || request.tickers.is_empty()
            {
                warn!(
                    kind = ?request.kind,
                    participants = ?request.participants,
                    "Ignoring invalid session request"
                );
                continue;
            }
            plans.push(SessionPlan::from(request));
        }

        let mut by_ticker: BTreeMap<&str, Vec<&SignalRecord>> = BTreeMap::new();
        for record in store.round(Round::One) {
            by_ticker.entry(record.ticker.as_str()).or_default().push(record);
        }

        for (ticker, records) in by_ticker {
            if records.len() < 2 || !self.disagree(&records) {
                continue;
            }
            let participants: Vec<String> = records.iter().map(|r| r.analyst_id.clone()).collect();
            let kind = if participants.len() == 2 {
                SessionKind::PrivateChat
            } else {
                SessionKind::Meeting
            };
            let plan = SessionPlan {
                kind,
                participants,
                tickers: vec![ticker.to_string()],
            };
            if !plans.contains(&plan) {
                plans.push(plan);
            }
        }

        if plans.len() > self.config.max_sessions {
            debug!(
                planned = plans.len(),
                max = self.config.max_sessions,
                "Dropping sessions over the daily cap"
            );
            plans.truncate(self.config.max_sessions);
        }
        plans
    }

    fn disagree(&self, records: &[&SignalRecord]) -> bool {
        let bullish = records.iter().any(|r| r.signal == Signal::Bullish);
        let bearish = records.iter().any(|r| r.signal == Signal::Bearish);
        if bullish && bearish {
            return true;
        }
        let max = records.iter().map(|r| r.confidence).max();
        let min = records.iter().map(|r| r.confidence).min();
        match (max, min) {
            (Some(max), Some(min)) => max - min > self.config.disagreement_spread,
            _ => false,
        }
    }

    /// Group plans into batches whose members touch pairwise disjoint keys.
    pub fn batches(plans: &[SessionPlan]) -> Vec<Vec<usize>> {
        let mut batches: Vec<(BTreeSet<SignalKey>, Vec<usize>)> = Vec::new();
        for (idx, plan) in plans.iter().enumerate() {
            let keys = plan.touched_keys();
            match batches.iter_mut().find(|(taken, _)| taken.is_disjoint(&keys)) {
                Some((taken, members)) => {
                    taken.extend(keys);
                    members.push(idx);
                }
                None => batches.push((keys, vec![idx])),
            }
        }
        batches.into_iter().map(|(_, members)| members).collect()
    }

    fn history_for(&self, analyst_id: &str, tickers: &[String]) -> Vec<String> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        match memory.search(&tickers.join(" "), analyst_id, self.memory_top_k) {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(analyst = analyst_id, error = %e, "Long-term memory search failed");
                Vec::new()
            }
        }
    }

    /// Run planned sessions; results come back in plan order.
    pub async fn run_sessions(
        &self,
        plans: &[SessionPlan],
        store: &SignalStore,
        analysts: &BTreeMap<String, Arc<dyn Analyst>>,
        recorder: &EventRecorder,
    ) -> (Vec<CommunicationSession>, Vec<PartialFailure>) {
        let mut finished: BTreeMap<usize, CommunicationSession> = BTreeMap::new();
        let mut failures = Vec::new();

        for batch in Self::batches(plans) {
            let mut handles = Vec::with_capacity(batch.len());
            for idx in batch {
                let plan = &plans[idx];
                let participants: Vec<Participant> = plan
                    .participants
                    .iter()
                    .filter_map(|id| match analysts.get(id) {
                        Some(analyst) => Some(Participant {
                            analyst: Arc::clone(analyst),
                            own_signals: store
                                .round_one_for(id)
                                .into_iter()
                                .filter(|(t, _)| plan.tickers.contains(t))
                                .collect(),
                            history: self.history_for(id, &plan.tickers),
                        }),
                        None => {
                            warn!(analyst = %id, "Session participant is not on the team");
                            None
                        }
                    })
                    .collect();

                if !plan.kind.accepts(participants.len()) {
                    warn!(
                        kind = ?plan.kind,
                        tickers = ?plan.tickers,
                        "Not enough participants; skipping session"
                    );
                    continue;
                }

                let task = SessionTask {
                    plan: plan.clone(),
                    participants,
                    broker: Arc::clone(&self.broker),
                    clock: Arc::clone(&self.clock),
                    recorder: recorder.clone(),
                    max_cycles: self.config.max_cycles,
                    recent_window_seconds: self.config.recent_window_seconds,
                };
                handles.push((idx, tokio::spawn(run_session(task))));
            }

            for (idx, handle) in handles {
                match handle.await {
                    Ok((session, session_failures)) => {
                        failures.extend(session_failures);
                        finished.insert(idx, session);
                    }
                    Err(e) => {
                        error!(error = %e, "Session task panicked");
                        failures.push(PartialFailure {
                            analyst_id: plans[idx].participants.join(","),
                            ticker: None,
                            round: Round::Two,
                            kind: FailureKind::Session,
                            message: format!("session task failed: {e}"),
                        });
                    }
                }
            }
        }

        (finished.into_values().collect(), failures)
    }

    /// Pairs that get a round-2 revision: touched by a session, or held by an
    /// analyst who received a high/critical notification since `round_one_done`.
    pub fn eligible_pairs(
        &self,
        store: &SignalStore,
        sessions: &[CommunicationSession],
        round_one_done: DateTime<Utc>,
    ) -> BTreeSet<SignalKey> {
        let mut eligible: BTreeSet<SignalKey> = sessions
            .iter()
            .flat_map(CommunicationSession::touched_keys)
            .filter(|key| store.get(key, Round::One).is_some())
            .collect();

        for agent in self.broker.registered_agents() {
            let escalated = match self.broker.get_memory(&agent) {
                Ok(memory) => memory
                    .since(round_one_done)
                    .iter()
                    .any(|n| n.urgency.is_escalated()),
                Err(_) => false,
            };
            if escalated {
                eligible.extend(
                    store
                        .round_one_for(&agent)
                        .into_keys()
                        .map(|ticker| SignalKey::new(agent.clone(), ticker)),
                );
            }
        }
        eligible
    }

    /// Re-invoke eligible analysts and store their round-2 records.
    ///
    /// A revision without an explicit `signal_adjustment = true` is stored as
    /// a copy of round 1. Pairs whose analyst failed get no round-2 record.
    #[allow(clippy::too_many_arguments)]
    pub async fn revise(
        &self,
        store: &mut SignalStore,
        eligible: &BTreeSet<SignalKey>,
        sessions: &[CommunicationSession],
        analysts: &BTreeMap<String, Arc<dyn Analyst>>,
        scheduler: &AnalystScheduler,
        context: &RoundContext,
    ) -> (Vec<SignalRecord>, Vec<PartialFailure>) {
        let mut by_analyst: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for key in eligible {
            by_analyst
                .entry(key.analyst_id.as_str())
                .or_default()
                .push(key.ticker.clone());
        }

        let mut ctx = context.clone();
        let mut team: Vec<Arc<dyn Analyst>> = Vec::new();
        let now = self.clock.now();
        for (analyst_id, tickers) in &by_analyst {
            let Some(analyst) = analysts.get(*analyst_id) else {
                continue;
            };
            let round_one = store.round_one_for(analyst_id);
            let notifications = self
                .broker
                .get_memory(analyst_id)
                .map(|m| m.recent(self.config.recent_window_seconds, now))
                .unwrap_or_default();
            ctx.inputs.insert(
                analyst_id.to_string(),
                AnalystInputs {
                    tickers: Some(tickers.clone()),
                    prior_signals: round_one
                        .into_iter()
                        .filter(|(t, _)| tickers.contains(t))
                        .collect(),
                    notifications,
                    sessions: sessions
                        .iter()
                        .filter(|s| s.involves(analyst_id))
                        .cloned()
                        .collect(),
                    historical_context: self.history_for(analyst_id, tickers),
                },
            );
            team.push(Arc::clone(analyst));
        }

        if team.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let outcome = scheduler.run(&team, &[], Round::Two, &ctx).await;
        let mut failures = outcome.failures;
        let mut revised = Vec::new();

        for key in eligible {
            let Some(round_one) = store.get(key, Round::One).cloned() else {
                continue;
            };
            let Some(candidate) = outcome.signals.get(key) else {
                continue;
            };
            let record = if candidate.signal_adjustment {
                candidate.clone()
            } else {
                round_one.unchanged_revision(candidate.created_at)
            };
            match store.insert(record.clone()) {
                Ok(()) => {
                    info!(
                        analyst = %key.analyst_id,
                        ticker = %key.ticker,
                        adjusted = record.signal_adjustment,
                        signal = %record.signal,
                        confidence = %record.confidence,
                        "Round-2 signal stored"
                    );
                    revised.push(record);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Round-2 record rejected");
                    failures.push(PartialFailure {
                        analyst_id: key.analyst_id.clone(),
                        ticker: Some(key.ticker.clone()),
                        round: Round::Two,
                        kind: FailureKind::Analyst,
                        message: e.to_string(),
                    });
                }
            }
        }

        (revised, failures)
    }

    /// The whole phase: sessions, eligibility, round 2.
    ///
    /// When communication is disabled or `max_cycles` is 0 nothing runs and
    /// round-1 records stay final.
    #[allow(clippy::too_many_arguments)]
    pub async fn communicate(
        &self,
        store: &mut SignalStore,
        analysts: &BTreeMap<String, Arc<dyn Analyst>>,
        scheduler: &AnalystScheduler,
        context: &RoundContext,
        requests: &[SessionRequest],
        round_one_done: DateTime<Utc>,
        recorder: &EventRecorder,
    ) -> CommunicationOutcome {
        if !self.config.is_active() {
            info!(
                enabled = self.config.enabled,
                max_cycles = self.config.max_cycles,
                "Communication off; round-1 signals are final"
            );
            return CommunicationOutcome::default();
        }

        let plans = self.plan_sessions(store, requests);
        let (sessions, mut failures) = self.run_sessions(&plans, store, analysts, recorder).await;

        let eligible = self.eligible_pairs(store, &sessions, round_one_done);
        info!(
            sessions = sessions.len(),
            eligible = eligible.len(),
            "Communication rounds finished"
        );

        let (revised, revise_failures) = self
            .revise(store, &eligible, &sessions, analysts, scheduler, context)
            .await;
        failures.extend(revise_failures);

        CommunicationOutcome {
            sessions,
            revised,
            failures,
        }
    }
}

async fn run_session(task: SessionTask) -> (CommunicationSession, Vec<PartialFailure>) {
    let SessionTask {
        plan,
        participants,
        broker,
        clock,
        recorder,
        max_cycles,
        recent_window_seconds,
    } = task;

    let ids: Vec<String> = participants.iter().map(|p| p.analyst.id().to_string()).collect();
    let mut session =
        CommunicationSession::open(plan.kind, ids.clone(), plan.tickers.clone(), clock.now());
    let mut failures = Vec::new();

    recorder.record(
        EventType::ConferenceStart,
        json!({
            "session_id": session.id,
            "kind": session.kind,
            "participants": ids,
            "tickers": plan.tickers,
        }),
    );
    info!(
        session = %session.id,
        kind = ?session.kind,
        participants = ?ids,
        tickers = ?plan.tickers,
        "Session opened"
    );

    let mut termination = SessionTermination::MaxCycles;
    for cycle in 1..=max_cycles {
        let mut wants_more = false;

        for participant in &participants {
            let speaker = participant.analyst.id().to_string();
            let recent_notifications = broker
                .get_memory(&speaker)
                .map(|m| m.recent(recent_window_seconds, clock.now()))
                .unwrap_or_default();
            let turn = ConversationTurn {
                session_id: session.id,
                kind: session.kind,
                speaker: speaker.clone(),
                participants: ids.clone(),
                tickers: plan.tickers.clone(),
                cycle,
                own_signals: participant.own_signals.clone(),
                recent_notifications,
                transcript: session.messages.clone(),
                historical_context: participant.history.clone(),
            };

            match participant.analyst.converse(&turn).await {
                Ok(reply) => {
                    session.push_message(&speaker, reply.content.clone(), clock.now());
                    recorder.record(
                        EventType::ConferenceMessage,
                        json!({
                            "session_id": session.id,
                            "speaker": speaker,
                            "content": reply.content,
                            "cycle": cycle,
                        }),
                    );
                    wants_more |= reply.wants_another_turn;
                }
                Err(e) => {
                    warn!(session = %session.id, analyst = %speaker, error = %e, "Turn failed");
                    failures.push(PartialFailure {
                        analyst_id: speaker,
                        ticker: None,
                        round: Round::Two,
                        kind: FailureKind::Session,
                        message: e.to_string(),
                    });
                }
            }
        }

        session.cycles_run = cycle;
        if !wants_more {
            termination = SessionTermination::Consensus;
            break;
        }
    }

    session.close(termination, clock.now());
    recorder.record(
        EventType::ConferenceEnd,
        json!({
            "session_id": session.id,
            "termination": termination,
            "cycles": session.cycles_run,
            "messages": session.messages.len(),
        }),
    );
    info!(session = %session.id, ?termination, cycles = session.cycles_run, "Session closed");

    (session, failures)
}
