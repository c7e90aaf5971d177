//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The URL frontier
//! - Per-host rate limiting and retry policy
//! - HTTP fetching
//! - HTML parsing, record extraction and link discovery
//! - Overall crawl orchestration

mod extract;
mod fetcher;
mod frontier;
mod orchestrator;
mod parser;
mod rate_limiter;
mod retry;

pub use extract::{resolve_link, Extractor, FieldSelector, PAGE_RULE};
pub use fetcher::{build_http_client, FetchResult, Fetcher};
pub use frontier::{Frontier, UrlTask};
pub use orchestrator::{crawl_scope, CrawlReport, Orchestrator, StartMode, StopReason};
pub use parser::{ParsedPage, Parser};
pub use rate_limiter::{HostPermit, RateLimiter};
pub use retry::RetryPolicy;
