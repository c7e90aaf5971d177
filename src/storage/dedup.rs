//! Session-level deduplication in front of the persistent store

use crate::state::TaskOutcome;
use crate::storage::traits::{RecordStore, StorageResult};
use crate::storage::{PageOutcome, Record};
use dashmap::DashSet;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Normalized URLs already dispatched in this session
///
/// Shared between the frontier (to refuse visited URLs) and the
/// deduplicator (to claim URLs before fetching).
#[derive(Debug, Default)]
pub struct VisitedSet {
    urls: DashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `url`; returns true for exactly one caller per URL
    pub fn insert(&self, url: &str) -> bool {
        self.urls.insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Releases a claim so the URL can be dispatched again after a resume
    pub fn remove(&self, url: &str) -> bool {
        self.urls.remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Filters records and URLs seen before and persists the rest
pub struct Deduplicator {
    store: Arc<dyn RecordStore>,
    visited: Arc<VisitedSet>,
    seen_keys: DashSet<String>,
    run_id: i64,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn RecordStore>, run_id: i64) -> Self {
        Self {
            store,
            visited: Arc::new(VisitedSet::new()),
            seen_keys: DashSet::new(),
            run_id,
        }
    }

    /// Loads the visited URLs and dedup keys of earlier runs
    ///
    /// Returns `(visited, keys)` counts.
    pub fn preload(&self) -> StorageResult<(usize, usize)> {
        let urls = self.store.visited_urls()?;
        let keys = self.store.dedup_keys()?;
        let counts = (urls.len(), keys.len());

        for url in urls {
            self.visited.insert(&url);
        }
        for key in keys {
            self.seen_keys.insert(key);
        }

        debug!(
            "Preloaded {} visited URLs and {} dedup keys",
            counts.0, counts.1
        );
        Ok(counts)
    }

    /// Persists `record` unless its dedup key was already seen
    ///
    /// Returns true if the record is new. The in-session check is one
    /// `DashSet` insert, so two pipelines racing on the same key never
    /// both reach the store.
    pub fn store(&self, record: &Record) -> StorageResult<bool> {
        if !self.seen_keys.insert(record.dedup_key.clone()) {
            return Ok(false);
        }

        match self.store.insert_record(record, self.run_id) {
            Ok(inserted) => Ok(inserted),
            Err(e) => {
                self.seen_keys.remove(&record.dedup_key);
                Err(e)
            }
        }
    }

    /// Claims `url` for fetching; true for exactly one caller per URL
    pub fn mark_visited(&self, url: &Url) -> bool {
        self.visited.insert(url.as_str())
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.visited.contains(url.as_str())
    }

    /// Persists the terminal outcome of a URL
    ///
    /// Aborted URLs are released from the visited set so a resumed run may
    /// dispatch them again.
    pub fn record_outcome(&self, outcome: &PageOutcome) -> StorageResult<()> {
        if outcome.outcome == TaskOutcome::Aborted {
            self.visited.remove(&outcome.url);
        }
        self.store.record_outcome(self.run_id, outcome)
    }

    /// Shared handle to the visited set
    pub fn visited(&self) -> Arc<VisitedSet> {
        Arc::clone(&self.visited)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}
