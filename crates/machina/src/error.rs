//! Crate-level error type for `machina`.
//!
//! One `#[non_exhaustive]` enum, built with `thiserror`, with `#[from]`
//! conversions wherever a sub-module needs one.

use thiserror::Error;

/// All errors `machina` can return.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MachinaError {
    /// A registration call used a name that is already taken, referenced an
    /// unknown concurrent group, or passed an invalid `count`.
    #[error("registration error: {0}")]
    Registration(String),

    /// `Event::start`/`Event::stop`/`Event::execute` referenced an unknown
    /// emit or execute name.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// A user-supplied emit or execute body returned an error.
    #[error("body error: {0}")]
    Body(#[from] BodyError),

    /// The interval-string grammar in §4.1/§6 was violated.
    #[error("invalid interval string: {0}")]
    InvalidInterval(String),
}

/// Wraps whatever error type a user's emit/execute body produces.
///
/// Bodies are generic over their own error type; this box lets the
/// scheduler carry a single concrete error through task boundaries and
/// `run()`'s fail-fast propagation (§7).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BodyError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

impl BodyError {
    /// Build a `BodyError` from any `std::error::Error`.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(err))
    }
}

pub type MachinaResult<T> = Result<T, MachinaError>;
