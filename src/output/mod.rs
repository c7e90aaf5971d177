//! Output module for crawl summaries and exports
//!
//! This module handles:
//! - Statistics read back from the harvest database
//! - The summary printed when a crawl ends
//! - Exporting stored records as JSON Lines or CSV

mod export;
pub mod stats;

pub use export::{
    export_csv, export_jsonl, export_records, export_target, write_csv, write_jsonl, ExportFormat,
};
pub use stats::{format_report, format_statistics, load_statistics, print_statistics, CrawlStatistics};
