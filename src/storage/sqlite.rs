//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the RecordStore trait.

use crate::state::TaskOutcome;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RecordStore, StorageError, StorageResult};
use crate::storage::{FrontierEntry, PageOutcome, Record, RunRecord, RunStatus};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
///
/// The connection sits behind a mutex held for one statement batch at a
/// time, so the store can be shared by all pipelines.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (dry runs and tests)
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

impl RecordStore for SqliteStore {
    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
            params![run_id],
            read_run,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                read_run,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Records =====

    fn insert_record(&self, record: &Record, run_id: i64) -> StorageResult<bool> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO records (dedup_key, rule, source_url, fields, extracted_at, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.dedup_key,
                record.rule,
                record.source_url,
                fields,
                record.extracted_at.to_rfc3339(),
                run_id
            ],
        )?;
        Ok(inserted > 0)
    }

    fn dedup_keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT dedup_key FROM records")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn load_records(&self) -> StorageResult<Vec<Record>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT dedup_key, rule, source_url, fields, extracted_at FROM records ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(dedup_key, rule, source_url, fields, extracted_at)| {
                let fields: BTreeMap<String, String> = serde_json::from_str(&fields)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                let extracted_at = DateTime::parse_from_rfc3339(&extracted_at)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?
                    .with_timezone(&Utc);
                Ok(Record {
                    rule,
                    source_url,
                    fields,
                    extracted_at,
                    dedup_key,
                })
            })
            .collect()
    }

    // ===== Pages =====

    fn record_outcome(&self, run_id: i64, outcome: &PageOutcome) -> StorageResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO pages (url, depth, outcome, status_code, error_message, visited_at, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                outcome.url,
                outcome.depth,
                outcome.outcome.to_db_string(),
                outcome.status_code,
                outcome.error,
                now,
                run_id
            ],
        )?;
        Ok(())
    }

    fn is_visited(&self, url: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM pages WHERE url = ?1 AND outcome != ?2",
                params![url, TaskOutcome::Aborted.to_db_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn visited_urls(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT url FROM pages WHERE outcome != ?1")?;
        let urls = stmt
            .query_map(params![TaskOutcome::Aborted.to_db_string()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    // ===== Frontier =====

    fn save_frontier(&self, entries: &[FrontierEntry]) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM frontier", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO frontier (url, depth, priority, seq) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (seq, entry) in entries.iter().enumerate() {
                stmt.execute(params![entry.url, entry.depth, entry.priority, seq as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT url, depth, priority FROM frontier ORDER BY priority, seq")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(FrontierEntry {
                    url: row.get(0)?,
                    depth: row.get(1)?,
                    priority: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn reset_crawl_state(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM pages; DELETE FROM frontier;")?;
        Ok(())
    }

    // ===== Statistics =====

    fn count_records(&self) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_records_by_rule(&self) -> StorageResult<HashMap<String, u64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT rule, COUNT(*) FROM records GROUP BY rule")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(counts)
    }

    fn count_pages_by_outcome(&self) -> StorageResult<HashMap<TaskOutcome, u64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT outcome, COUNT(*) FROM pages GROUP BY outcome")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(outcome, count)| {
                TaskOutcome::from_db_string(&outcome).map(|outcome| (outcome, count))
            })
            .collect())
    }

    fn failed_pages(&self, limit: usize) -> StorageResult<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT url, COALESCE(error_message, '') FROM pages
             WHERE outcome IN (?1, ?2)
             ORDER BY visited_at DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![
                    TaskOutcome::FetchFailed.to_db_string(),
                    TaskOutcome::ParseFailed.to_db_string(),
                    limit as i64
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
