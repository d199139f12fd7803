//! SQLite persistence for the session log.
//!
//! RULE: only store.rs talks to the database. The scheduler calls store
//! methods; nothing else executes SQL.

use rusqlite::{params, Connection};

use crate::error::SimResult;
use crate::event::SessionLogEntry;

pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open (or create) the session database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_session_log.sql"))?;
        Ok(())
    }

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, 0i64],
        )?;
        Ok(())
    }

    pub fn append_event(&self, entry: &SessionLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO session_log (run_id, step, sim_date, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.step as i64,
                entry.sim_date.to_string(),
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> SimResult<Vec<SessionLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, step, sim_date, event_type, payload
             FROM session_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(SessionLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    step: row.get::<_, i64>(2)? as usize,
                    sim_date: row
                        .get::<_, String>(3)?
                        .parse()
                        .unwrap_or_default(),
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> SimResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM session_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
