//! Store implementations: in-memory for tests and demos, SQLite for real use.

use std::path::Path;

use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{EngineError, Result};
use crate::state::InvestigationState;

use super::{InvestigationStore, VersionedState};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS investigations (
    id           TEXT PRIMARY KEY,
    entity_kind  TEXT NOT NULL,
    entity_value TEXT NOT NULL,
    phase        TEXT NOT NULL,
    state        TEXT NOT NULL,
    version      INTEGER NOT NULL,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_investigations_entity
    ON investigations(entity_kind, entity_value);
"#;

fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// SQLite-backed store. A single connection behind a mutex is plenty for the
/// engine's write pattern (one snapshot per orchestrator decision).
pub struct SqliteInvestigationStore {
    conn: Mutex<Connection>,
}

impl SqliteInvestigationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl InvestigationStore for SqliteInvestigationStore {
    fn create(&self, state: &InvestigationState) -> Result<u64> {
        let json = serde_json::to_string(state)?;
        let now = unix_timestamp();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO investigations
                 (id, entity_kind, entity_value, phase, state, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![
                state.investigation_id,
                state.entity.kind,
                state.entity.value,
                state.current_phase.to_string(),
                json,
                now,
            ],
        )?;
        Ok(1)
    }

    fn get(&self, investigation_id: &str) -> Result<VersionedState> {
        let conn = self.conn.lock();
        let row: Option<(String, u64)> = conn
            .query_row(
                "SELECT state, version FROM investigations WHERE id = ?1",
                params![investigation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (json, version) = row.ok_or_else(|| EngineError::NotFound(investigation_id.to_string()))?;
        Ok(VersionedState {
            state: serde_json::from_str(&json)?,
            version,
        })
    }

    fn update(
        &self,
        investigation_id: &str,
        state: &InvestigationState,
        expected_version: u64,
    ) -> Result<u64> {
        let json = serde_json::to_string(state)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE investigations
                SET phase = ?1, state = ?2, version = version + 1, updated_at = ?3
              WHERE id = ?4 AND version = ?5",
            params![
                state.current_phase.to_string(),
                json,
                unix_timestamp(),
                investigation_id,
                expected_version,
            ],
        )?;

        if changed == 1 {
            return Ok(expected_version + 1);
        }

        // Zero rows: either the id is unknown or the version moved.
        let actual: Option<u64> = conn
            .query_row(
                "SELECT version FROM investigations WHERE id = ?1",
                params![investigation_id],
                |row| row.get(0),
            )
            .optional()?;
        match actual {
            Some(actual) => Err(EngineError::VersionConflict {
                id: investigation_id.to_string(),
                expected: expected_version,
                actual,
            }),
            None => Err(EngineError::NotFound(investigation_id.to_string())),
        }
    }
}

/// In-memory store for tests and single-process demos. Same optimistic
/// concurrency semantics as the SQLite store.
#[derive(Default)]
pub struct MemoryInvestigationStore {
    rows: DashMap<String, VersionedState>,
}

impl MemoryInvestigationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvestigationStore for MemoryInvestigationStore {
    fn create(&self, state: &InvestigationState) -> Result<u64> {
        self.rows.insert(
            state.investigation_id.clone(),
            VersionedState {
                state: state.clone(),
                version: 1,
            },
        );
        Ok(1)
    }

    fn get(&self, investigation_id: &str) -> Result<VersionedState> {
        self.rows
            .get(investigation_id)
            .map(|row| row.clone())
            .ok_or_else(|| EngineError::NotFound(investigation_id.to_string()))
    }

    fn update(
        &self,
        investigation_id: &str,
        state: &InvestigationState,
        expected_version: u64,
    ) -> Result<u64> {
        let mut row = self
            .rows
            .get_mut(investigation_id)
            .ok_or_else(|| EngineError::NotFound(investigation_id.to_string()))?;

        if row.version != expected_version {
            return Err(EngineError::VersionConflict {
                id: investigation_id.to_string(),
                expected: expected_version,
                actual: row.version,
            });
        }
        row.state = state.clone();
        row.version += 1;
        Ok(row.version)
    }
}
