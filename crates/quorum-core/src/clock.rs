//! Time sources for the day cycle.
//!
//! `SystemClock` reads wall time and refuses any manipulation.
//! `VirtualClock` keeps `simulated = real + offset_ms` and only ever moves
//! forward, either explicitly (`fast_forward`) or when the orchestrator skips
//! ahead to a session boundary (`advance_to`).

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("{0} is only supported by the virtual clock")]
    NotVirtual(&'static str),

    #[error("fast-forward must be positive, got {0} minutes")]
    InvalidMinutes(i64),

    #[error("simulated time out of range")]
    OutOfRange,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    #[default]
    System,
    Virtual,
}

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    fn kind(&self) -> ClockKind;

    fn is_virtual(&self) -> bool {
        self.kind() == ClockKind::Virtual
    }

    /// Move simulated time forward by `minutes`. Rejected on a real clock.
    fn fast_forward(&self, minutes: i64) -> Result<DateTime<Utc>, ClockError>;

    /// Move simulated time forward to `target` if it lies ahead. Never moves
    /// backwards. Rejected on a real clock.
    fn advance_to(&self, target: DateTime<Utc>) -> Result<DateTime<Utc>, ClockError>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn kind(&self) -> ClockKind {
        ClockKind::System
    }

    fn fast_forward(&self, _minutes: i64) -> Result<DateTime<Utc>, ClockError> {
        Err(ClockError::NotVirtual("fast_forward"))
    }

    fn advance_to(&self, _target: DateTime<Utc>) -> Result<DateTime<Utc>, ClockError> {
        Err(ClockError::NotVirtual("advance_to"))
    }
}

/// Serializable view of a virtual clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualClockState {
    pub offset_ms: i64,
    pub last_real_time: DateTime<Utc>,
}

type RealTimeSource = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Simulated time running at wall speed from a configurable starting point.
pub struct VirtualClock {
    state: Mutex<VirtualClockState>,
    real_time: RealTimeSource,
}

impl VirtualClock {
    /// A clock whose simulated time starts at `start` and then tracks wall time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::with_source(start, Arc::new(Utc::now))
    }

    /// A clock whose simulated time only moves when fast-forwarded.
    pub fn frozen_at(start: DateTime<Utc>) -> Self {
        let anchor = Utc::now();
        Self::with_source(start, Arc::new(move || anchor))
    }

    pub fn with_source(start: DateTime<Utc>, real_time: RealTimeSource) -> Self {
        let real_now = real_time();
        let offset_ms = (start - real_now).num_milliseconds();
        Self {
            state: Mutex::new(VirtualClockState {
                offset_ms,
                last_real_time: real_now,
            }),
            real_time,
        }
    }

    pub fn state(&self) -> VirtualClockState {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VirtualClockState> {
        // The state is two integers; a poisoned guard still holds a valid value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `delta_ms` to the offset. The state is left untouched on overflow.
    fn shift(&self, delta_ms: i64) -> Result<DateTime<Utc>, ClockError> {
        let real_now = (self.real_time)();
        let mut state = self.lock();
        let offset_ms = state
            .offset_ms
            .checked_add(delta_ms)
            .ok_or(ClockError::OutOfRange)?;
        let simulated = Duration::try_milliseconds(offset_ms)
            .and_then(|offset| real_now.checked_add_signed(offset))
            .ok_or(ClockError::OutOfRange)?;
        state.offset_ms = offset_ms;
        state.last_real_time = real_now;
        Ok(simulated)
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("state", &self.state())
            .finish()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let real_now = (self.real_time)();
        let mut state = self.lock();
        state.last_real_time = real_now;
        real_now + Duration::milliseconds(state.offset_ms)
    }

    fn kind(&self) -> ClockKind {
        ClockKind::Virtual
    }

    fn fast_forward(&self, minutes: i64) -> Result<DateTime<Utc>, ClockError> {
        if minutes <= 0 {
            return Err(ClockError::InvalidMinutes(minutes));
        }
        let delta_ms = minutes
            .checked_mul(60_000)
            .ok_or(ClockError::OutOfRange)?;
        let now = self.shift(delta_ms)?;
        tracing::debug!(minutes, simulated = %now, "Virtual clock fast-forwarded");
        Ok(now)
    }

    fn advance_to(&self, target: DateTime<Utc>) -> Result<DateTime<Utc>, ClockError> {
        let now = self.now();
        if target <= now {
            return Ok(now);
        }
        self.shift((target - now).num_milliseconds())
    }
}
