//! Parameter-resolution contract for emit/execute bodies (§4.7).
//!
//! Dependency-injection machinery that resolves per-call argument
//! providers is out of scope here (§1); what this module keeps is the
//! seam it would occupy. A [`DependencyResolver`] is asked, once per
//! scheduled invocation, to produce the extra arguments an
//! [`crate::event::Event`] should merge into the call — a narrow,
//! object-safe contract around a larger subsystem this crate does not
//! own.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::MachinaError;

/// Extra named values resolved for a single invocation and merged into its
/// `Event`.
pub type ResolvedArgs = HashMap<String, Box<dyn std::any::Any + Send + Sync>>;

/// Resolves extra arguments before each emit tick or execute call.
///
/// Implementors may look up request-scoped state, open a database handle,
/// or anything else that needs to vary per invocation; `machina` itself
/// only calls `resolve` and merges the result into the `Event` passed to
/// the body. A resolver error surfaces to the scheduler as a `BodyError`
/// (§7).
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(&self) -> Result<ResolvedArgs, MachinaError>;
}

/// Default resolver that contributes nothing. Used whenever a schedule is
/// registered without an explicit resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

#[async_trait]
impl DependencyResolver for NoopResolver {
    async fn resolve(&self) -> Result<ResolvedArgs, MachinaError> {
        Ok(HashMap::new())
    }
}
