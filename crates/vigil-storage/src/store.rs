//! Pattern statistics store.
//!
//! A keyed record store of per-signature outcome counters, reloaded at
//! startup and flushed after updates. The contract is read-modify-persist
//! idempotence, not a transactional log: `upsert` overwrites the full row.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StorageError};
use crate::pool::ConnectionPool;

/// Historical outcome counters for one content signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStat {
    /// Normalized textual signature this row tracks.
    pub signature: String,
    /// Total validated requests that carried this signature.
    pub total: u64,
    /// Requests that were ultimately judged secure.
    pub secure: u64,
    /// Requests that were ultimately judged insecure.
    pub insecure: u64,
    /// When this signature was last observed.
    pub last_seen: DateTime<Utc>,
}

impl PatternStat {
    /// Creates a fresh stat row for a newly observed signature.
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            total: 0,
            secure: 0,
            insecure: 0,
            last_seen: Utc::now(),
        }
    }

    /// Fraction of observations that were insecure, or `None` with no history.
    pub fn insecure_ratio(&self) -> Option<f32> {
        if self.total == 0 {
            None
        } else {
            Some(self.insecure as f32 / self.total as f32)
        }
    }

    /// Records one outcome against this signature.
    pub fn record(&mut self, is_secure: bool) {
        self.total += 1;
        if is_secure {
            self.secure += 1;
        } else {
            self.insecure += 1;
        }
        self.last_seen = Utc::now();
    }
}

/// SQLite-backed store for pattern statistics.
#[derive(Clone)]
pub struct PatternStatStore {
    pool: ConnectionPool,
}

impl PatternStatStore {
    /// Open the store in the default app data directory.
    pub fn new() -> Result<Self> {
        let path = Self::default_db_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening pattern-stat store at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Open the store at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::new(&path)?;
        Ok(Self { pool })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Default database path under the platform data directory.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "vigil", "vigil")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("vigil.db"))
    }

    /// Load every persisted stat row.
    pub fn load_all(&self) -> Result<Vec<PatternStat>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT signature, total, secure, insecure, last_seen
             FROM pattern_stats ORDER BY signature ASC",
        )?;

        let stats = stmt
            .query_map([], |row| {
                let last_seen: String = row.get(4)?;
                Ok(PatternStat {
                    signature: row.get(0)?,
                    total: row.get::<_, i64>(1)? as u64,
                    secure: row.get::<_, i64>(2)? as u64,
                    insecure: row.get::<_, i64>(3)? as u64,
                    last_seen: DateTime::parse_from_rfc3339(&last_seen)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(stats)
    }

    /// Insert or overwrite one stat row.
    pub fn upsert(&self, stat: &PatternStat) -> Result<()> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO pattern_stats (signature, total, secure, insecure, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(signature) DO UPDATE SET
                total = excluded.total,
                secure = excluded.secure,
                insecure = excluded.insecure,
                last_seen = excluded.last_seen",
            params![
                stat.signature,
                stat.total as i64,
                stat.secure as i64,
                stat.insecure as i64,
                stat.last_seen.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Delete one stat row by signature.
    pub fn delete(&self, signature: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM pattern_stats WHERE signature = ?1",
            [signature],
        )?;
        Ok(())
    }

    /// Number of persisted rows.
    pub fn count(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pattern_stats", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_load() {
        let store = PatternStatStore::in_memory().unwrap();

        let mut stat = PatternStat::new("cmd:rm_rf");
        stat.record(false);
        stat.record(false);
        stat.record(true);
        store.upsert(&stat).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].signature, "cmd:rm_rf");
        assert_eq!(loaded[0].total, 3);
        assert_eq!(loaded[0].insecure, 2);
        assert_eq!(loaded[0].secure, 1);
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let store = PatternStatStore::in_memory().unwrap();

        let mut stat = PatternStat::new("code:eval");
        stat.record(false);
        store.upsert(&stat).unwrap();

        stat.record(true);
        store.upsert(&stat).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].total, 2);
    }

    #[test]
    fn delete_removes_row() {
        let store = PatternStatStore::in_memory().unwrap();

        store.upsert(&PatternStat::new("cmd:sudo")).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        store.delete("cmd:sudo").unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn insecure_ratio_requires_history() {
        let mut stat = PatternStat::new("cmd:curl");
        assert!(stat.insecure_ratio().is_none());

        stat.record(false);
        stat.record(true);
        let ratio = stat.insecure_ratio().unwrap();
        assert!((ratio - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.db");

        {
            let store = PatternStatStore::with_path(&path).unwrap();
            let mut stat = PatternStat::new("sql:drop_table");
            stat.record(false);
            store.upsert(&stat).unwrap();
        }

        let store = PatternStatStore::with_path(&path).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].insecure, 1);
    }
}
