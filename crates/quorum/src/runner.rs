use chrono::NaiveDate;
use quorum_core::TradingDayState;
use quorum_store::DayStore;
use tracing::{error, info, warn};

use crate::day_cycle::DayCycleOrchestrator;
use crate::error::CycleError;

/// What a multi-day run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Days persisted, in order, including non-trading and aborted days.
    pub days: Vec<NaiveDate>,
    /// Days that failed fatally and were not persisted.
    pub failed: Vec<(NaiveDate, CycleError)>,
    /// Set when the run stopped on cancellation.
    pub cancelled_at: Option<NaiveDate>,
    /// State of the last persisted day.
    pub last_state: Option<TradingDayState>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cancelled_at.is_none()
    }
}

/// Run every calendar day in `[start, end]`, each seeded from the last frozen
/// state (a day persisted before `start` resumes an earlier run). A failing
/// day is reported and skipped; the next day seeds from the last good one.
pub async fn run_range(
    orchestrator: &DayCycleOrchestrator,
    store: &DayStore,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RunSummary, CycleError> {
    let mut summary = RunSummary {
        last_state: store.latest_before(start)?,
        ..Default::default()
    };
    if let Some(prior) = &summary.last_state {
        info!(resumed_from = %prior.date, "Seeding from persisted day");
    }

    let cancel = orchestrator.cancel_token();
    for date in start.iter_days().take_while(|d| *d <= end) {
        if cancel.is_cancelled() {
            summary.cancelled_at = Some(date);
            break;
        }

        let outcome = match orchestrator.run_day(date, summary.last_state.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%date, error = %e, "Trading day failed");
                summary.failed.push((date, e));
                continue;
            }
        };

        let dir = store.save_day(&outcome.state, &outcome.timeline)?;
        info!(%date, dir = %dir.display(), events = outcome.timeline.len(), "Day persisted");
        summary.days.push(date);

        if let Some(phase) = outcome.state.aborted_at {
            warn!(%date, phase = phase.as_str(), "Run stopped by cancellation");
            summary.cancelled_at = Some(date);
            break;
        }
        summary.last_state = Some(outcome.state);
    }

    Ok(summary)
}
