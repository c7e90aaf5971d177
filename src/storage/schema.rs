//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Extracted records, one row per dedup key
CREATE TABLE IF NOT EXISTS records (
    dedup_key TEXT PRIMARY KEY,
    rule TEXT NOT NULL,
    source_url TEXT NOT NULL,
    fields TEXT NOT NULL,
    extracted_at TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES runs(id)
);

CREATE INDEX IF NOT EXISTS idx_records_rule ON records(rule);
CREATE INDEX IF NOT EXISTS idx_records_source ON records(source_url);

-- Terminal outcome of every dispatched URL
CREATE TABLE IF NOT EXISTS pages (
    url TEXT PRIMARY KEY,
    depth INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    status_code INTEGER,
    error_message TEXT,
    visited_at TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES runs(id)
);

CREATE INDEX IF NOT EXISTS idx_pages_outcome ON pages(outcome);

-- Pending work of an interrupted run
CREATE TABLE IF NOT EXISTS frontier (
    url TEXT PRIMARY KEY,
    depth INTEGER NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    seq INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frontier_priority ON frontier(priority, seq);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Schema version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;
