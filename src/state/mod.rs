//! State types shared across the crawl pipeline
//!
//! # Components
//!
//! - `HostState`: per-host politeness bookkeeping owned by the rate limiter
//! - `CrawlPhase`: lifecycle of one orchestrator run
//! - `TaskOutcome`: terminal result of a single URL, persisted for the summary

mod crawl_phase;
mod host_state;
mod task_outcome;

pub use crawl_phase::CrawlPhase;
pub use host_state::{HostState, MAX_CRAWL_DELAY};
pub use task_outcome::TaskOutcome;
