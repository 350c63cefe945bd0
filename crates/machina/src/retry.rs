//! Retry-policy seam (§4.8).
//!
//! The original retry strategies (`RetryFixed`, `RetryExponentialAndJitter`,
//! `RetryFibonacci`, `RetryRange`) are out of scope: this crate does not
//! re-invoke a failed body on its own. What it keeps is the contract point
//! a future retry layer would plug into — a schedule can carry a
//! `RetryPolicy`, and `machina` asks it once per failure for a backoff, but
//! nothing in this crate currently loops on the answer.

use std::time::Duration;

use crate::error::MachinaError;

/// Decides whether and how long to wait before a failed invocation is
/// retried.
///
/// `machina`'s scheduler does not call this yet — it is here so a schedule
/// can be registered with a policy today and have it take effect once a
/// retry loop is built on top, without a breaking change to the
/// registration API.
pub trait RetryPolicy: Send + Sync {
    /// Returns `Some(delay)` to retry after `delay`, or `None` to give up.
    /// `attempt` is 1 for the first retry (i.e. the second overall attempt).
    fn should_retry(&self, attempt: u32, err: &MachinaError) -> Option<Duration>;
}

/// Never retries. The default for schedules registered without a policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _err: &MachinaError) -> Option<Duration> {
        None
    }
}
