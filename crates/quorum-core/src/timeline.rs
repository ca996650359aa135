//! Per-day event timeline.
//!
//! The recorder appends events stamped relative to the day start; the
//! replayer turns a finished log into `(event, delay_ms)` pairs for a viewer.
//! Replay depends only on the recorded timestamps, so replaying the same log
//! always yields the same sequence.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DayStart,
    DayComplete,
    PhaseChange,
    Signal,
    Notification,
    PartialFailure,
    ConferenceStart,
    ConferenceMessage,
    ConferenceEnd,
    AgentMessage,
    TeamSummary,
    TeamPortfolio,
    TeamTrades,
    TeamStats,
    TeamLeaderboard,
    PriceUpdate,
    TimeUpdate,
    FastForwardSuccess,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub relative_timestamp_ms: i64,
}

/// Append-only writer for one day's timeline. Clones share the same log.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    day_start: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    events: Arc<Mutex<Vec<TimelineEvent>>>,
}

impl EventRecorder {
    pub fn new(day_start: DateTime<Utc>, clock: Arc<dyn Clock>) -> Self {
        Self {
            day_start,
            clock,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn day_start(&self) -> DateTime<Utc> {
        self.day_start
    }

    /// Append an event stamped `now - day_start`.
    pub fn record(&self, event_type: EventType, payload: serde_json::Value) -> TimelineEvent {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        // Stamp under the lock so log order and timestamp order agree.
        let relative = (self.clock.now() - self.day_start).num_milliseconds().max(0);
        let event = TimelineEvent {
            event_type,
            payload,
            relative_timestamp_ms: relative,
        };
        events.push(event.clone());
        event
    }

    /// Point-in-time copy of the log.
    pub fn snapshot(&self) -> Vec<TimelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    /// Delays are divided by this factor. Values <= 0 are treated as 1.
    pub speed: f64,
    /// Upper bound on a single delay after scaling.
    pub max_delay_ms: Option<u64>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            max_delay_ms: None,
        }
    }
}

/// Read-only view over a recorded log.
#[derive(Debug, Clone)]
pub struct EventReplayer {
    events: Arc<[TimelineEvent]>,
    options: ReplayOptions,
}

impl EventReplayer {
    pub fn new(events: Vec<TimelineEvent>) -> Self {
        Self::with_options(events, ReplayOptions::default())
    }

    pub fn with_options(events: Vec<TimelineEvent>, options: ReplayOptions) -> Self {
        Self {
            events: events.into(),
            options,
        }
    }

    /// A fresh lazy pass over the log. Each call starts from the beginning.
    pub fn replay(&self) -> Replay {
        Replay {
            events: Arc::clone(&self.events),
            options: self.options,
            idx: 0,
            previous_ms: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Iterator of `(event, delay_ms)`; the delay is the wait before emitting the event.
#[derive(Debug, Clone)]
pub struct Replay {
    events: Arc<[TimelineEvent]>,
    options: ReplayOptions,
    idx: usize,
    previous_ms: i64,
}

impl Replay {
    fn scale(&self, raw_ms: i64) -> u64 {
        let raw = raw_ms.max(0) as f64;
        let speed = if self.options.speed > 0.0 {
            self.options.speed
        } else {
            1.0
        };
        let scaled = (raw / speed).round() as u64;
        match self.options.max_delay_ms {
            Some(cap) => scaled.min(cap),
            None => scaled,
        }
    }
}

impl Iterator for Replay {
    type Item = (TimelineEvent, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.events.get(self.idx)?.clone();
        self.idx += 1;
        let delay = self.scale(event.relative_timestamp_ms - self.previous_ms);
        self.previous_ms = self.previous_ms.max(event.relative_timestamp_ms);
        Some((event, delay))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.events.len() - self.idx;
        (remaining, Some(remaining))
    }
}

/// Replay a log with default options.
pub fn replay(log: &[TimelineEvent]) -> Replay {
    EventReplayer::new(log.to_vec()).replay()
}
