//! Statistics from the harvest database and the end-of-crawl summary

use crate::crawler::CrawlReport;
use crate::state::TaskOutcome;
use crate::storage::{RecordStore, RunRecord, StorageResult};
use std::collections::HashMap;
use std::fmt::Write;

/// Failed URLs listed in the statistics output
const FAILED_PAGES_SHOWN: usize = 20;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub latest_run: Option<RunRecord>,

    pub total_records: u64,

    /// Record count per extraction rule
    pub records_by_rule: HashMap<String, u64>,

    /// URL count per terminal outcome
    pub pages_by_outcome: HashMap<TaskOutcome, u64>,

    /// Most recent failures as `(url, error)`
    pub failed_pages: Vec<(String, String)>,
}

impl CrawlStatistics {
    pub fn total_pages(&self) -> u64 {
        self.pages_by_outcome.values().sum()
    }

    pub fn pages(&self, outcome: TaskOutcome) -> u64 {
        self.pages_by_outcome.get(&outcome).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
pub fn load_statistics(store: &dyn RecordStore) -> StorageResult<CrawlStatistics> {
    Ok(CrawlStatistics {
        latest_run: store.latest_run()?,
        total_records: store.count_records()?,
        records_by_rule: store.count_records_by_rule()?,
        pages_by_outcome: store.count_pages_by_outcome()?,
        failed_pages: store.failed_pages(FAILED_PAGES_SHOWN)?,
    })
}

/// Formats statistics for the terminal
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Harvest Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        let _ = writeln!(out, "Latest run:");
        let _ = writeln!(out, "  Run ID: {}", run.id);
        let _ = writeln!(out, "  Status: {}", run.status.to_db_string());
        let _ = writeln!(out, "  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            let _ = writeln!(out, "  Finished: {}", finished);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Records: {}", stats.total_records);
    let mut rules: Vec<_> = stats.records_by_rule.iter().collect();
    rules.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (rule, count) in rules {
        let _ = writeln!(out, "  {}: {}", rule, count);
    }
    let _ = writeln!(out);

    let total_pages = stats.total_pages();
    let _ = writeln!(out, "Pages: {}", total_pages);
    for outcome in TaskOutcome::ALL {
        let count = stats.pages(outcome);
        if count == 0 {
            continue;
        }
        let percentage = (count as f64 / total_pages as f64) * 100.0;
        let _ = writeln!(out, "  {}: {} ({:.1}%)", outcome, count, percentage);
    }

    if !stats.failed_pages.is_empty() {
        let _ = writeln!(out, "\nRecent failures:");
        for (url, error) in &stats.failed_pages {
            let _ = writeln!(out, "  - {}: {}", url, error);
        }
    }

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", format_statistics(stats));
}

/// Formats the summary printed when a crawl ends
pub fn format_report(report: &CrawlReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Crawl Summary (run {}) ===", report.run_id);

    let _ = match report.stop_reason {
        Some(reason) => writeln!(out, "Phase: {} ({})", report.phase, reason),
        None => writeln!(out, "Phase: {}", report.phase),
    };
    let _ = writeln!(out, "Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    let _ = writeln!(out, "URLs dispatched: {}", report.dispatched);
    let _ = writeln!(out, "  stored: {}", report.succeeded());
    let _ = writeln!(
        out,
        "  failed: {} (fetch {}, parse {})",
        report.failed(),
        report.count(TaskOutcome::FetchFailed),
        report.count(TaskOutcome::ParseFailed)
    );
    let _ = writeln!(
        out,
        "  skipped: {} (robots {}, aborted {})",
        report.skipped(),
        report.count(TaskOutcome::Disallowed),
        report.count(TaskOutcome::Aborted)
    );
    let _ = writeln!(
        out,
        "Records: {} new, {} duplicate",
        report.records_stored, report.records_duplicate
    );
    if report.frontier_saved > 0 {
        let _ = writeln!(out, "Frontier saved for resume: {}", report.frontier_saved);
    }
    if let Some(cause) = &report.fatal_error {
        let _ = writeln!(out, "Fatal error: {}", cause);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PageOutcome, Record, SqliteStore};
    use std::collections::BTreeMap;

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::new_in_memory().unwrap();
        let run_id = store.create_run("hash").unwrap();

        for (rule, name) in [("item", "a"), ("item", "b"), ("page", "c")] {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), name.to_string());
            let record = Record::new(rule, "https://example.com/", fields, &[]);
            store.insert_record(&record, run_id).unwrap();
        }

        for (url, outcome, error) in [
            ("https://example.com/", TaskOutcome::Stored, None),
            ("https://example.com/x", TaskOutcome::FetchFailed, Some("HTTP 404")),
            ("https://example.com/y", TaskOutcome::Disallowed, None),
        ] {
            store
                .record_outcome(
                    run_id,
                    &PageOutcome {
                        url: url.to_string(),
                        depth: 0,
                        outcome,
                        status_code: None,
                        error: error.map(str::to_string),
                    },
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_load_statistics() {
        let store = seeded_store();
        let stats = load_statistics(&store).unwrap();

        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.records_by_rule["item"], 2);
        assert_eq!(stats.total_pages(), 3);
        assert_eq!(stats.pages(TaskOutcome::Stored), 1);
        assert_eq!(stats.pages(TaskOutcome::Aborted), 0);
        assert_eq!(stats.failed_pages.len(), 1);
        assert!(stats.latest_run.is_some());
    }

    #[test]
    fn test_format_statistics() {
        let stats = load_statistics(&seeded_store()).unwrap();
        let text = format_statistics(&stats);

        assert!(text.contains("Records: 3"));
        assert!(text.contains("  item: 2"));
        assert!(text.contains("Pages: 3"));
        assert!(text.contains("https://example.com/x: HTTP 404"));
    }

    #[test]
    fn test_format_empty_statistics() {
        let stats = load_statistics(&SqliteStore::new_in_memory().unwrap()).unwrap();
        let text = format_statistics(&stats);
        assert!(text.contains("Records: 0"));
        assert!(text.contains("Pages: 0"));
        assert!(!text.contains("Latest run"));
    }
}
