//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::TaskOutcome;
use crate::storage::{FrontierEntry, PageOutcome, Record, RunRecord, RunStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Methods take `&self`: implementations synchronize internally so one
/// store can be shared by every pipeline behind an `Arc`.
pub trait RecordStore: Send + Sync {
    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Records =====

    /// Inserts a record unless its dedup key is already stored
    ///
    /// Returns true if a row was written.
    fn insert_record(&self, record: &Record, run_id: i64) -> StorageResult<bool>;

    /// All stored dedup keys
    fn dedup_keys(&self) -> StorageResult<Vec<String>>;

    /// All stored records in insertion order
    fn load_records(&self) -> StorageResult<Vec<Record>>;

    // ===== Pages =====

    /// Records the terminal outcome of a URL, replacing any earlier one
    fn record_outcome(&self, run_id: i64, outcome: &PageOutcome) -> StorageResult<()>;

    /// Returns true if the URL has a stored outcome other than `aborted`
    fn is_visited(&self, url: &str) -> StorageResult<bool>;

    /// URLs with a stored outcome other than `aborted`
    fn visited_urls(&self) -> StorageResult<Vec<String>>;

    // ===== Frontier =====

    /// Replaces the persisted frontier
    fn save_frontier(&self, entries: &[FrontierEntry]) -> StorageResult<()>;

    /// Loads the persisted frontier
    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>>;

    /// Forgets visited pages and the persisted frontier; records are kept
    fn reset_crawl_state(&self) -> StorageResult<()>;

    // ===== Statistics =====

    fn count_records(&self) -> StorageResult<u64>;

    fn count_records_by_rule(&self) -> StorageResult<HashMap<String, u64>>;

    fn count_pages_by_outcome(&self) -> StorageResult<HashMap<TaskOutcome, u64>>;

    /// Failed URLs with their error messages, most recent first
    fn failed_pages(&self, limit: usize) -> StorageResult<Vec<(String, String)>>;
}
