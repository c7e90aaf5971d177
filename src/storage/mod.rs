//! Storage module for persisting crawl results
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Deduplicated record persistence
//! - Per-URL outcomes, which double as the visited set on resume
//! - Frontier persistence and run bookkeeping

mod dedup;
mod schema;
mod sqlite;
mod traits;

pub use dedup::{Deduplicator, VisitedSet};
pub use sqlite::SqliteStore;
pub use traits::{RecordStore, StorageError, StorageResult};

use crate::state::TaskOutcome;
use crate::HarvestError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Opens (or creates) the SQLite store at `path`
pub fn open_store(path: &Path) -> Result<SqliteStore, HarvestError> {
    SqliteStore::new(path)
}

/// One extracted record
///
/// `fields` is an open key/value mapping. `source_url` and `extracted_at`
/// are always present and exported alongside the fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Name of the extraction rule that produced the record
    pub rule: String,
    pub source_url: String,
    pub fields: BTreeMap<String, String>,
    pub extracted_at: DateTime<Utc>,
    /// Hex SHA-256 identifying the record across sessions
    pub dedup_key: String,
}

impl Record {
    /// Creates a record and computes its dedup key
    ///
    /// With `key_fields` empty, every field takes part in the key.
    pub fn new(
        rule: impl Into<String>,
        source_url: impl Into<String>,
        fields: BTreeMap<String, String>,
        key_fields: &[String],
    ) -> Self {
        let rule = rule.into();
        let dedup_key = compute_dedup_key(&rule, &fields, key_fields);
        Self {
            rule,
            source_url: source_url.into(),
            fields,
            extracted_at: Utc::now(),
            dedup_key,
        }
    }
}

/// Hashes the rule name and the identifying fields of a record
///
/// Fields are fed as `name=value` pairs separated by NUL bytes so that
/// shifting characters between adjacent values changes the key. A key field
/// missing from the record hashes as an empty value.
pub fn compute_dedup_key(
    rule: &str,
    fields: &BTreeMap<String, String>,
    key_fields: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule.as_bytes());
    hasher.update([0u8]);

    if key_fields.is_empty() {
        for (name, value) in fields {
            feed_field(&mut hasher, name, value);
        }
    } else {
        for name in key_fields {
            let value = fields.get(name).map(String::as_str).unwrap_or("");
            feed_field(&mut hasher, name, value);
        }
    }

    hex::encode(hasher.finalize())
}

fn feed_field(hasher: &mut Sha256, name: &str, value: &str) {
    hasher.update(name.as_bytes());
    hasher.update(b"=");
    hasher.update(value.as_bytes());
    hasher.update([0u8]);
}

/// Terminal outcome of one URL as persisted in the `pages` table
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub url: String,
    pub depth: u32,
    pub outcome: TaskOutcome,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// A frontier entry persisted for resume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
    pub priority: u32,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    /// Frontier exhausted
    Completed,
    /// Stopped early by cancellation or a stop condition; resumable
    Interrupted,
    /// Ended by a fatal error
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true if a later run can pick up where this one left off
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted | Self::Failed)
    }
}
