/// Page state definitions for tracking harvest progress
///
/// Every page of a source moves through a small state machine during a run:
///
/// ```text
/// Pending -> InFlight -> Completed
///                     -> Retrying -> InFlight
///                     -> PermanentlyFailed
/// ```
use std::fmt;

/// Represents the current state of a page within a single harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    // ===== Active States =====
    /// Page is waiting to be claimed by a worker
    Pending,

    /// Page has been claimed by exactly one worker and is being fetched
    InFlight,

    /// Page failed a retryable attempt and is waiting for its backoff to elapse
    Retrying,

    // ===== Terminal States =====
    /// Page was fetched, parsed and passed validation
    Completed,

    /// Page exhausted its retry budget (or hit a non-retryable failure) in this run
    PermanentlyFailed,
}

impl PageState {
    /// Checks whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: PageState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Completed)
                | (Self::InFlight, Self::Retrying)
                | (Self::InFlight, Self::PermanentlyFailed)
                | (Self::Retrying, Self::InFlight)
        )
    }

    /// Name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }

}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
