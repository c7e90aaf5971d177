//! Configuration module for Sumi-Harvest
//!
//! This module handles loading, parsing, overriding and validating the TOML
//! configuration.
//!
//! # Example
//!
//! ```no_run
//! use sumi_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, ConfigOverrides, CrawlerConfig, ExtractRule, LinksConfig, OutputConfig,
    RateLimitConfig, RetryConfig, UserAgentConfig,
};

pub use parser::{
    apply_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
};
pub use validation::validate;
