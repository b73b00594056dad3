//! Failure classification and retry policy
//!
//! Every page failure is mapped onto a closed taxonomy of error kinds. The kind
//! decides whether the page is retried, how long it waits first, and which
//! remedy is suggested to the operator.

mod backoff;
mod classifier;
mod error_log;

pub use backoff::BackoffHint;
pub use classifier::{
    classify, BackoffPolicy, Classification, ErrorKind, RemedyTag, RetryPolicy,
};
pub use error_log::{ErrorLog, ErrorRecord};
