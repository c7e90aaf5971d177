use std::fmt;

/// Terminal result of processing one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    /// Fetched, parsed and its records handed to the store
    Stored,

    /// Fetch failed permanently or ran out of retries
    FetchFailed,

    /// Content could not be parsed (not HTML, empty body)
    ParseFailed,

    /// robots.txt forbids the URL
    Disallowed,

    /// Cancelled mid-flight when the crawl stopped
    Aborted,
}

impl TaskOutcome {
    pub const ALL: [TaskOutcome; 5] = [
        Self::Stored,
        Self::FetchFailed,
        Self::ParseFailed,
        Self::Disallowed,
        Self::Aborted,
    ];

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Stored)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FetchFailed | Self::ParseFailed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Disallowed | Self::Aborted)
    }

    /// Converts the outcome to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::FetchFailed => "fetch_failed",
            Self::ParseFailed => "parse_failed",
            Self::Disallowed => "disallowed",
            Self::Aborted => "aborted",
        }
    }

    /// Parses an outcome from its database string representation
    ///
    /// Returns None if the string doesn't match any known outcome.
    pub fn from_db_string(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.to_db_string() == s)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
