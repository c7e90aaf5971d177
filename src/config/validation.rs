use crate::config::types::{
    Config, CrawlerConfig, OutputConfig, RateLimitConfig, RetryConfig, UserAgentConfig,
};
use crate::crawler::Extractor;
use crate::url::normalize_url;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_retry_config(&config.retry)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_seeds(&config.seeds)?;
    validate_rule_names(config)?;

    // Compiling the extractor checks every selector and key field
    Extractor::new(&config.extract, &config.links)?;

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "max-concurrency must be between 1 and 256, got {}",
            config.max_concurrency
        )));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1 when set".to_string(),
        ));
    }

    if config.time_budget_secs == Some(0) {
        return Err(ConfigError::Validation(
            "time-budget-secs must be >= 1 when set".to_string(),
        ));
    }

    if config.shutdown_grace_ms > 3_600_000 {
        return Err(ConfigError::Validation(format!(
            "shutdown-grace-ms must be at most one hour, got {}ms",
            config.shutdown_grace_ms
        )));
    }

    if config.request_timeout_secs == 0 || config.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request and connect timeouts must be >= 1 second".to_string(),
        ));
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.min_interval_ms > 3_600_000 {
        return Err(ConfigError::Validation(format!(
            "min-interval-ms must be at most one hour, got {}ms",
            config.min_interval_ms
        )));
    }

    if config.backoff_base_ms > config.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-base-ms ({}) cannot exceed backoff-max-ms ({})",
            config.backoff_base_ms, config.backoff_max_ms
        )));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be at most 20, got {}",
            config.max_retries
        )));
    }

    if config.multiplier < 1.0 || !config.multiplier.is_finite() {
        return Err(ConfigError::Validation(format!(
            "retry multiplier must be >= 1.0, got {}",
            config.multiplier
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "retry jitter must be between 0.0 and 1.0, got {}",
            config.jitter
        )));
    }

    if config.initial_backoff_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "initial-backoff-ms ({}) cannot exceed max-backoff-ms ({})",
            config.initial_backoff_ms, config.max_backoff_ms
        )));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;
    }

    if let Some(email) = &config.contact_email {
        validate_email(email)?;
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.log_file.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "log-file cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        normalize_url(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    }
    Ok(())
}

fn validate_rule_names(config: &Config) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for rule in &config.extract {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "extract rule name cannot be empty".to_string(),
            ));
        }
        if !seen.insert(rule.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate extract rule name '{}'",
                rule.name
            )));
        }
    }
    Ok(())
}

/// Validates a scope pattern: a host name, optionally prefixed with `*.`
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Pattern '{}' has no domain after the wildcard",
            pattern
        )));
    }

    if !domain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must be lowercase letters, digits, '.' or '-'",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}
