//! Frontier of URLs waiting to be crawled
//!
//! A priority queue keyed on `(priority, insertion order)`: lower priority
//! values pop first and equal priorities pop FIFO.

use crate::storage::{FrontierEntry, VisitedSet};
use crate::url::normalize_url;
use crate::UrlResult;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// A URL to crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTask {
    /// Normalized URL
    pub url: Url,

    /// Link distance from a seed (seeds are 0)
    pub depth: u32,

    /// Lower values are crawled first
    pub priority: u32,

    pub discovered_at: DateTime<Utc>,
}

impl UrlTask {
    /// Creates a task whose priority equals its depth (breadth-first)
    pub fn new(url: Url, depth: u32) -> Self {
        Self {
            url,
            depth,
            priority: depth,
            discovered_at: Utc::now(),
        }
    }

    /// Normalizes `url` and creates a depth-0 task
    pub fn seed(url: &str) -> UrlResult<Self> {
        Ok(Self::new(normalize_url(url)?, 0))
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Restores a task persisted by an earlier run
    pub fn from_entry(entry: &FrontierEntry) -> UrlResult<Self> {
        let url = normalize_url(&entry.url)?;
        Ok(Self::new(url, entry.depth).with_priority(entry.priority))
    }

    pub fn to_entry(&self) -> FrontierEntry {
        FrontierEntry {
            url: self.url.to_string(),
            depth: self.depth,
            priority: self.priority,
        }
    }
}

#[derive(Debug)]
struct QueuedTask {
    task: UrlTask,
    seq: u64,
}

// BinaryHeap is a max-heap; reverse both keys so the lowest
// (priority, seq) pair is on top
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

#[derive(Debug, Default)]
struct FrontierInner {
    heap: BinaryHeap<QueuedTask>,
    queued: HashSet<String>,
    next_seq: u64,
}

/// Pending URL tasks
///
/// The lock is held only for one push or pop. Pushing a URL that is
/// already queued or already visited is a no-op.
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    visited: Arc<VisitedSet>,
}

impl Frontier {
    pub fn new(visited: Arc<VisitedSet>) -> Self {
        Self {
            inner: Mutex::new(FrontierInner::default()),
            visited,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        // A panic while holding this lock cannot leave the heap and the
        // queued set out of step, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `task`; returns false if its URL was already queued or visited
    pub fn push(&self, task: UrlTask) -> bool {
        let key = task.url.as_str();
        if self.visited.contains(key) {
            return false;
        }

        let mut inner = self.lock();
        if !inner.queued.insert(key.to_string()) {
            return false;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueuedTask { task, seq });
        true
    }

    /// Pops the pending task with the lowest priority value
    pub fn pop(&self) -> Option<UrlTask> {
        let mut inner = self.lock();
        let queued = inner.heap.pop()?;
        inner.queued.remove(queued.task.url.as_str());
        Some(queued.task)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Pending tasks in pop order, leaving the queue untouched
    pub fn snapshot(&self) -> Vec<UrlTask> {
        let inner = self.lock();
        let mut queued: Vec<&QueuedTask> = inner.heap.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));
        queued.into_iter().map(|q| q.task.clone()).collect()
    }

    /// Removes and returns every pending task in pop order
    pub fn drain_pending(&self) -> Vec<UrlTask> {
        let mut inner = self.lock();
        inner.queued.clear();
        let mut tasks = Vec::with_capacity(inner.heap.len());
        while let Some(queued) = inner.heap.pop() {
            tasks.push(queued.task);
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(url: &str, priority: u32) -> UrlTask {
        UrlTask::seed(url).unwrap().with_priority(priority)
    }

    fn frontier() -> Frontier {
        Frontier::new(Arc::new(VisitedSet::new()))
    }

    #[test]
    fn test_pop_empty() {
        let frontier = frontier();
        assert!(frontier.pop().is_none());
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_priority_order() {
        let frontier = frontier();
        frontier.push(task("https://example.com/low", 5));
        frontier.push(task("https://example.com/high", 1));
        frontier.push(task("https://example.com/mid", 3));

        assert_eq!(frontier.pop().unwrap().url.path(), "/high");
        assert_eq!(frontier.pop().unwrap().url.path(), "/mid");
        assert_eq!(frontier.pop().unwrap().url.path(), "/low");
        assert!(frontier.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let frontier = frontier();
        for name in ["c", "a", "d", "b"] {
            frontier.push(task(&format!("https://example.com/{}", name), 1));
        }

        let order: Vec<String> = std::iter::from_fn(|| frontier.pop())
            .map(|t| t.url.path().to_string())
            .collect();
        assert_eq!(order, vec!["/c", "/a", "/d", "/b"]);
    }

    #[test]
    fn test_push_is_idempotent() {
        let frontier = frontier();
        assert!(frontier.push(task("https://example.com/a", 1)));
        assert!(!frontier.push(task("https://example.com/a", 0)));
        assert_eq!(frontier.len(), 1);

        // Same URL spelled differently normalizes to the same key
        assert!(!frontier.push(task("https://EXAMPLE.com/a/#frag", 1)));
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_push_visited_is_noop() {
        let visited = Arc::new(VisitedSet::new());
        let frontier = Frontier::new(Arc::clone(&visited));
        visited.insert("https://example.com/seen");

        assert!(!frontier.push(task("https://example.com/seen", 0)));
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_repush_after_pop() {
        let frontier = frontier();
        frontier.push(task("https://example.com/a", 1));
        frontier.pop().unwrap();

        // Not visited and no longer queued
        assert!(frontier.push(task("https://example.com/a", 1)));
    }

    #[test]
    fn test_drain_pending() {
        let frontier = frontier();
        frontier.push(task("https://example.com/b", 2));
        frontier.push(task("https://example.com/a", 1));

        let drained = frontier.drain_pending();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].url.path(), "/a");
        assert!(frontier.is_empty());
        assert!(frontier.push(task("https://example.com/a", 1)));
    }

    #[test]
    fn test_snapshot_keeps_queue() {
        let frontier = frontier();
        frontier.push(task("https://example.com/b", 2));
        frontier.push(task("https://example.com/a", 1));
        frontier.push(task("https://example.com/c", 2));

        let paths: Vec<String> = frontier
            .snapshot()
            .iter()
            .map(|t| t.url.path().to_string())
            .collect();
        assert_eq!(paths, vec!["/a", "/b", "/c"]);
        assert_eq!(frontier.len(), 3);
    }

    #[test]
    fn test_entry_round_trip() {
        let original = UrlTask::new(Url::parse("https://example.com/x").unwrap(), 2).with_priority(7);
        let restored = UrlTask::from_entry(&original.to_entry()).unwrap();
        assert_eq!(restored.url, original.url);
        assert_eq!(restored.depth, 2);
        assert_eq!(restored.priority, 7);
    }

    #[test]
    fn test_default_priority_is_depth() {
        let t = UrlTask::new(Url::parse("https://example.com/").unwrap(), 3);
        assert_eq!(t.priority, 3);
    }
}
