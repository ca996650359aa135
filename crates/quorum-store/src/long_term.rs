use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use crate::day_store::validate_component;
use crate::error::StoreError;

const MEMORY_DDL: &str = "\
CREATE TABLE IF NOT EXISTS memories (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id    TEXT NOT NULL,
    text        TEXT NOT NULL,
    metadata    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_id);
";

/// Long-term memory used to seed prompts with historical context.
/// Never holds orchestration state.
pub trait MemoryBackend: Send + Sync {
    fn add(
        &self,
        text: &str,
        agent_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Up to `top_k` snippets for `agent_id`, best match first.
    fn search(&self, query: &str, agent_id: &str, top_k: usize) -> Result<Vec<String>, StoreError>;
}

/// One SQLite database per agent, ranked by query-term overlap.
pub struct SqliteMemoryBackend {
    root: Option<PathBuf>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl SqliteMemoryBackend {
    /// Databases live at `<root>/<agent_id>/memory.db`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Per-agent in-memory databases, dropped with the backend.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn with_connection<T>(
        &self,
        agent_id: &str,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        validate_component(agent_id)?;
        let mut connections = self
            .connections
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("memory mutex poisoned: {e}")))?;

        if !connections.contains_key(agent_id) {
            let conn = match &self.root {
                Some(root) => {
                    let dir = root.join(agent_id);
                    fs::create_dir_all(&dir)?;
                    Connection::open(dir.join("memory.db"))?
                }
                None => Connection::open_in_memory()?,
            };
            conn.execute_batch(MEMORY_DDL)?;
            debug!(agent = agent_id, "Opened long-term memory");
            connections.insert(agent_id.to_string(), conn);
        }

        match connections.get(agent_id) {
            Some(conn) => f(conn),
            None => Err(StoreError::Unavailable(format!("no memory for {agent_id}"))),
        }
    }
}

impl MemoryBackend for SqliteMemoryBackend {
    fn add(
        &self,
        text: &str,
        agent_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(metadata)?;
        self.with_connection(agent_id, |conn| {
            conn.execute(
                "INSERT INTO memories (agent_id, text, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![agent_id, text, metadata, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    fn search(&self, query: &str, agent_id: &str, top_k: usize) -> Result<Vec<String>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let rows = self.with_connection(agent_id, |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, text FROM memories WHERE agent_id = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map([agent_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(rows.into_iter().take(top_k).map(|(_, text)| text).collect());
        }

        let mut scored: Vec<(usize, i64, String)> = rows
            .into_iter()
            .filter_map(|(id, text)| {
                let overlap = tokenize(&text).intersection(&terms).count();
                (overlap > 0).then_some((overlap, id, text))
            })
            .collect();
        // Best overlap first, newest first on ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(scored.into_iter().take(top_k).map(|(_, _, text)| text).collect())
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}
