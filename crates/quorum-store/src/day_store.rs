use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use quorum_core::{TimelineEvent, TradingDayState};
use tracing::debug;

use crate::error::StoreError;

const STATE_FILE: &str = "state.json";
const TIMELINE_FILE: &str = "timeline.jsonl";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// On-disk layout of one run:
///
/// ```text
/// <data_dir>/<run_name>/days/<YYYY-MM-DD>/state.json
/// <data_dir>/<run_name>/days/<YYYY-MM-DD>/timeline.jsonl
/// <data_dir>/<run_name>/memory/<agent_id>/memory.db
/// ```
#[derive(Debug, Clone)]
pub struct DayStore {
    root: PathBuf,
}

impl DayStore {
    pub fn new(data_dir: impl AsRef<Path>, run_name: &str) -> Result<Self, StoreError> {
        validate_component(run_name)?;
        Ok(Self {
            root: data_dir.as_ref().join(run_name),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join("days").join(date.format(DATE_FORMAT).to_string())
    }

    /// Directory holding every agent's long-term memory database.
    pub fn memory_root(&self) -> PathBuf {
        self.root.join("memory")
    }

    /// Persist a frozen day. The state file is written last and renamed into
    /// place, so a directory with `state.json` always has a full timeline.
    pub fn save_day(
        &self,
        state: &TradingDayState,
        timeline: &[TimelineEvent],
    ) -> Result<PathBuf, StoreError> {
        let dir = self.day_dir(state.date);
        fs::create_dir_all(&dir)?;

        let timeline_path = dir.join(TIMELINE_FILE);
        let mut writer = BufWriter::new(fs::File::create(&timeline_path)?);
        for event in timeline {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        let tmp = dir.join(format!("{STATE_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, dir.join(STATE_FILE))?;

        debug!(date = %state.date, events = timeline.len(), dir = %dir.display(), "Day persisted");
        Ok(dir)
    }

    pub fn load_state(&self, date: NaiveDate) -> Result<Option<TradingDayState>, StoreError> {
        let dir = self.day_dir(date);
        if !dir.join(STATE_FILE).exists() {
            return Ok(None);
        }
        read_state(&dir).map(Some)
    }

    pub fn load_timeline(&self, date: NaiveDate) -> Result<Vec<TimelineEvent>, StoreError> {
        read_timeline(&self.day_dir(date))
    }

    /// Dates with a persisted state, ascending.
    pub fn list_days(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let days_dir = self.root.join("days");
        if !days_dir.exists() {
            return Ok(Vec::new());
        }
        let mut days = Vec::new();
        for entry in fs::read_dir(&days_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(date) = NaiveDate::parse_from_str(name, DATE_FORMAT) else {
                continue;
            };
            if entry.path().join(STATE_FILE).exists() {
                days.push(date);
            }
        }
        days.sort();
        Ok(days)
    }

    /// Latest persisted state strictly before `date`, used to seed a resumed run.
    pub fn latest_before(&self, date: NaiveDate) -> Result<Option<TradingDayState>, StoreError> {
        match self.list_days()?.into_iter().filter(|d| *d < date).next_back() {
            Some(day) => self.load_state(day),
            None => Ok(None),
        }
    }
}

/// Read `state.json` from a day directory.
pub fn read_state(day_dir: &Path) -> Result<TradingDayState, StoreError> {
    let raw = fs::read(day_dir.join(STATE_FILE))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Read `timeline.jsonl` from a day directory. Blank lines are skipped.
pub fn read_timeline(day_dir: &Path) -> Result<Vec<TimelineEvent>, StoreError> {
    let path = day_dir.join(TIMELINE_FILE);
    let reader = BufReader::new(fs::File::open(&path)?);
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|e| {
            StoreError::Corrupt(format!("{}:{}: {e}", path.display(), idx + 1))
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Reject names that would escape the store root.
pub(crate) fn validate_component(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(StoreError::InvalidKey(name.to_string()));
    }
    Ok(())
}
