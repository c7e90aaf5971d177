//! Robots.txt parser implementation
//!
//! Allow/disallow matching is delegated to the robotstxt crate; the
//! non-standard `Crawl-delay` directive is parsed here.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Parsed robots.txt data for one host
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw robots.txt content (empty string means allow all)
    content: String,
    allow_all: bool,
}

impl ParsedRobots {
    /// Creates a new ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
        }
    }

    /// Creates a permissive ParsedRobots that allows everything
    ///
    /// This is used when robots.txt is missing or cannot be fetched.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Checks if `url` (a full URL or a path) is allowed for `user_agent`
    ///
    /// `user_agent` should be the product token, e.g. `Sumi-Harvest`.
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Gets the crawl delay in seconds for a specific user agent
    ///
    /// A delay in a group naming the agent wins over one in the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        if self.allow_all || self.content.is_empty() {
            return None;
        }

        let agent = user_agent.to_lowercase();
        let mut group_agents: Vec<String> = Vec::new();
        let mut in_agent_lines = false;
        let mut delay_for_wildcard: Option<f64> = None;
        let mut delay_for_agent: Option<f64> = None;

        for line in self.content.lines() {
            // Strip trailing comments
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // Consecutive User-agent lines share one group
                    if !in_agent_lines {
                        group_agents.clear();
                    }
                    in_agent_lines = true;
                    group_agents.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_agent_lines = false;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    if !delay.is_finite() || delay < 0.0 {
                        continue;
                    }

                    if group_agents.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        delay_for_agent = Some(delay);
                    } else if group_agents.iter().any(|ua| ua == "*") {
                        delay_for_wildcard = Some(delay);
                    }
                }
                _ => in_agent_lines = false,
            }
        }

        delay_for_agent.or(delay_for_wildcard)
    }

    /// [`crawl_delay`](Self::crawl_delay) as a `Duration`
    pub fn crawl_delay_duration(&self, user_agent: &str) -> Option<Duration> {
        self.crawl_delay(user_agent)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}
