use crate::config::types::{Config, ConfigOverrides};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses and validates a configuration file
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Max depth: {}", config.crawler.max_depth);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_bytes(content.as_bytes()))
}

/// Loads a configuration and returns both the config and its file hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Applies command line / environment overrides and re-validates
///
/// Override seeds replace the file's seeds rather than extending them.
pub fn apply_overrides(config: &mut Config, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
    if !overrides.seeds.is_empty() {
        config.seeds = overrides.seeds.clone();
    }
    if let Some(concurrency) = overrides.concurrency {
        config.crawler.max_concurrency = concurrency;
    }
    if let Some(interval) = overrides.interval_ms {
        config.rate_limit.min_interval_ms = interval;
    }
    if let Some(depth) = overrides.max_depth {
        config.crawler.max_depth = depth;
    }
    if let Some(pages) = overrides.max_pages {
        config.crawler.max_pages = Some(pages);
    }
    if let Some(retries) = overrides.max_retries {
        config.retry.max_retries = retries;
    }
    if let Some(database) = &overrides.database {
        config.output.database_path = database.clone();
    }

    validate(config)
}

impl Config {
    /// Hash of the effective configuration, recorded with every run
    ///
    /// Unlike [`compute_config_hash`] this covers overrides and defaults.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| ConfigError::Validation(format!("Cannot serialize config: {}", e)))?;
        Ok(hash_bytes(&bytes))
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
