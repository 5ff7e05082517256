//! Durable mirror of runtime status transitions.
//!
//! Write-only observer: the in-memory runtime table stays authoritative, but
//! each transition is upserted here keyed by model name so the last known
//! status (including stale PIDs an operator may want to reconcile) survives
//! a supervisor restart.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct PersistedModelState {
    pub model: String,
    pub status: String,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub updated_at: String,
}

pub struct StateSink {
    path: PathBuf,
}

impl StateSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS runtime_models (
                model TEXT PRIMARY KEY,
                status TEXT,
                port INTEGER,
                pid INTEGER,
                updated_at TEXT
            )",
            [],
        )?;
        Ok(conn)
    }

    pub fn upsert(&self, model: &str, status: &str, port: Option<u16>, pid: Option<u32>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO runtime_models(model, status, port, pid, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(model) DO UPDATE SET
               status=excluded.status,
               port=excluded.port,
               pid=excluded.pid,
               updated_at=excluded.updated_at",
            params![model, status, port, pid, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove(&self, model: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM runtime_models WHERE model = ?1", params![model])?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<PersistedModelState>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT model, status, port, pid, updated_at FROM runtime_models ORDER BY model")?;
        let rows = stmt.query_map([], |row| {
            Ok(PersistedModelState {
                model: row.get(0)?,
                status: row.get(1)?,
                port: row.get(2)?,
                pid: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upsert_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let sink = StateSink::new(dir.path().join("runtime_state.db"));

        sink.upsert("m1", "loading", None, None).unwrap();
        sink.upsert("m1", "ready", Some(8081), Some(4242)).unwrap();
        sink.upsert("m2", "stopped", None, None).unwrap();

        let states = sink.all().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].model, "m1");
        assert_eq!(states[0].status, "ready");
        assert_eq!(states[0].port, Some(8081));
        assert_eq!(states[0].pid, Some(4242));
        assert_eq!(states[1].model, "m2");
        assert!(states[1].port.is_none());
    }

    #[test]
    fn test_upsert_is_keyed_by_model() {
        let dir = TempDir::new().unwrap();
        let sink = StateSink::new(dir.path().join("runtime_state.db"));

        for status in ["loading", "ready", "stopped"] {
            sink.upsert("m1", status, None, None).unwrap();
        }
        let states = sink.all().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, "stopped");
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let sink = StateSink::new(dir.path().join("runtime_state.db"));

        sink.upsert("m1", "ready", Some(8081), Some(1)).unwrap();
        sink.remove("m1").unwrap();
        assert!(sink.all().unwrap().is_empty());
    }
}
