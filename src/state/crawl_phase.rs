use crate::HarvestError;
use std::fmt;

/// Lifecycle of a crawl run
///
/// ```text
/// Idle -> Running -> Drained
///                 -> Draining -> Stopped
///                 -> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    /// Created, not started
    Idle,

    /// Dispatching work from the frontier
    Running,

    /// A stop was requested; waiting for in-flight work to finish
    Draining,

    /// Frontier exhausted with nothing in flight
    Drained,

    /// Ended early by cancellation, a stop condition or a fatal error
    Stopped,
}

impl CrawlPhase {
    /// Returns true if the run can no longer change phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Drained | Self::Stopped)
    }

    /// Checks whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Drained)
                | (Self::Running, Self::Draining)
                | (Self::Running, Self::Stopped)
                | (Self::Draining, Self::Stopped)
        )
    }

    /// Returns the next phase, or `InvalidTransition` if the move is illegal
    pub fn transition(self, next: CrawlPhase) -> Result<CrawlPhase, HarvestError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(HarvestError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Database representation, used as the status of a run row
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Drained => "drained",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
