use crate::retry::backoff::BackoffHint;
use crate::source::PageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Closed taxonomy of failures seen while harvesting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimit,
    Connection,
    ParseError,
    LowItems,
    /// Page count could not be determined; fatal for the source
    DiscoveryError,
    /// Document download failed; scoped to one item
    DownloadError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Connection => "connection",
            Self::ParseError => "parse_error",
            Self::LowItems => "low_items",
            Self::DiscoveryError => "discovery_error",
            Self::DownloadError => "download_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggested operator remedy attached to each recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemedyTag {
    IncreaseWait,
    ReduceConcurrency,
    RetryRequest,
    CheckSelectors,
    RetryPage,
    CheckContentType,
    CheckPagination,
}

impl RemedyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncreaseWait => "increase_wait",
            Self::ReduceConcurrency => "reduce_concurrency",
            Self::RetryRequest => "retry_request",
            Self::CheckSelectors => "check_selectors",
            Self::RetryPage => "retry_page",
            Self::CheckContentType => "check_content_type",
            Self::CheckPagination => "check_pagination",
        }
    }
}

impl fmt::Display for RemedyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff curve parameters for one failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
        }
    }
}

/// Retry budget and per-kind backoff curves
///
/// Low-item retries have their own curve rather than sharing the network one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts per page per run
    pub max_retries: u32,

    /// Maximum number of attempts for a page that keeps failing to parse
    pub parse_error_limit: u32,

    pub network: BackoffPolicy,
    pub rate_limit: BackoffPolicy,
    pub connection: BackoffPolicy,
    pub low_items: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            parse_error_limit: 3,
            network: BackoffPolicy::from_millis(3_000, 60_000),
            rate_limit: BackoffPolicy::from_millis(15_000, 120_000),
            connection: BackoffPolicy::from_millis(1_000, 10_000),
            low_items: BackoffPolicy::from_millis(2_000, 5_000),
        }
    }
}

impl RetryPolicy {
    /// Attempt ceiling for a classified failure
    pub fn attempt_limit(&self, classification: &Classification) -> u32 {
        match classification.attempt_cap {
            Some(cap) => cap.min(self.max_retries),
            None => self.max_retries,
        }
    }
}

/// Outcome of classifying one page failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub backoff: BackoffHint,
    pub remedy: RemedyTag,

    /// Tighter attempt ceiling than the global budget, if any
    pub attempt_cap: Option<u32>,

    /// Whether the orchestrator should lower concurrency in response
    pub reduce_concurrency: bool,
}

/// Maps a page failure to its kind, retryability and backoff
///
/// | kind        | retryable        | backoff                               |
/// |-------------|------------------|---------------------------------------|
/// | timeout     | yes              | exponential on the network curve      |
/// | rate_limit  | yes              | exponential, at least `Retry-After`   |
/// | connection  | yes              | immediate, then escalating            |
/// | parse_error | yes, capped      | none                                  |
/// | low_items   | yes              | exponential on its own curve          |
pub fn classify(error: &PageError, policy: &RetryPolicy) -> Classification {
    match error {
        PageError::Timeout { .. } => Classification {
            kind: ErrorKind::Timeout,
            retryable: true,
            backoff: BackoffHint::Exponential {
                base: policy.network.base,
                max: policy.network.max,
                floor: None,
            },
            remedy: RemedyTag::IncreaseWait,
            attempt_cap: None,
            reduce_concurrency: false,
        },
        PageError::RateLimit { retry_after, .. } => Classification {
            kind: ErrorKind::RateLimit,
            retryable: true,
            backoff: BackoffHint::Exponential {
                base: policy.rate_limit.base,
                max: policy.rate_limit.max,
                floor: *retry_after,
            },
            remedy: RemedyTag::ReduceConcurrency,
            attempt_cap: None,
            reduce_concurrency: true,
        },
        PageError::Connection { .. } => Classification {
            kind: ErrorKind::Connection,
            retryable: true,
            backoff: BackoffHint::Escalating {
                base: policy.connection.base,
                max: policy.connection.max,
            },
            remedy: RemedyTag::RetryRequest,
            attempt_cap: None,
            reduce_concurrency: false,
        },
        PageError::Parse { .. } => Classification {
            kind: ErrorKind::ParseError,
            retryable: true,
            backoff: BackoffHint::None,
            remedy: RemedyTag::CheckSelectors,
            attempt_cap: Some(policy.parse_error_limit),
            reduce_concurrency: false,
        },
        PageError::LowItems { .. } => Classification {
            kind: ErrorKind::LowItems,
            retryable: true,
            backoff: BackoffHint::Exponential {
                base: policy.low_items.base,
                max: policy.low_items.max,
                floor: None,
            },
            remedy: RemedyTag::RetryPage,
            attempt_cap: None,
            reduce_concurrency: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_page_errors_are_retryable() {
        let policy = RetryPolicy::default();
        let errors = vec![
            PageError::Timeout {
                detail: "t".into(),
            },
            PageError::RateLimit {
                retry_after: None,
                detail: "r".into(),
            },
            PageError::Connection {
                detail: "c".into(),
            },
            PageError::Parse {
                detail: "p".into(),
            },
            PageError::LowItems { found: 3, floor: 5 },
        ];

        for error in &errors {
            assert!(classify(error, &policy).retryable, "{:?}", error);
        }
    }

    #[test]
    fn test_kinds_match_errors() {
        let policy = RetryPolicy::default();
        assert_eq!(
            classify(&PageError::LowItems { found: 1, floor: 18 }, &policy).kind,
            ErrorKind::LowItems
        );
        assert_eq!(
            classify(
                &PageError::Parse {
                    detail: "no cards".into()
                },
                &policy
            )
            .kind,
            ErrorKind::ParseError
        );
    }

    #[test]
    fn test_rate_limit_honours_retry_after() {
        let policy = RetryPolicy::default();
        let classification = classify(
            &PageError::RateLimit {
                retry_after: Some(Duration::from_secs(90)),
                detail: "429".into(),
            },
            &policy,
        );

        assert!(classification.reduce_concurrency);
        assert_eq!(classification.backoff.base_delay(1), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_errors_use_tighter_cap() {
        let policy = RetryPolicy::default();
        let classification = classify(
            &PageError::Parse {
                detail: "bad".into(),
            },
            &policy,
        );

        assert_eq!(classification.backoff, BackoffHint::None);
        assert_eq!(policy.attempt_limit(&classification), 3);
    }

    #[test]
    fn test_parse_cap_never_exceeds_global_budget() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        let classification = classify(
            &PageError::Parse {
                detail: "bad".into(),
            },
            &policy,
        );
        assert_eq!(policy.attempt_limit(&classification), 2);
    }

    #[test]
    fn test_low_items_curve_is_independent() {
        let policy = RetryPolicy {
            network: BackoffPolicy::from_millis(10_000, 60_000),
            low_items: BackoffPolicy::from_millis(1_000, 2_000),
            ..RetryPolicy::default()
        };

        let low = classify(&PageError::LowItems { found: 0, floor: 8 }, &policy);
        let timeout = classify(
            &PageError::Timeout {
                detail: "slow".into(),
            },
            &policy,
        );

        assert_eq!(low.backoff.base_delay(1), Duration::from_secs(1));
        assert_eq!(timeout.backoff.base_delay(1), Duration::from_secs(10));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        assert_eq!(ErrorKind::LowItems.to_string(), "low_items");
    }
}
