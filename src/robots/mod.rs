//! Robots.txt handling module
//!
//! Fetching, parsing and caching of robots.txt files, so that disallowed
//! paths are skipped and `Crawl-delay` feeds the rate limiter.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;
