//! The per-iteration handle passed to emit bodies (§4.5).
//!
//! An `Event` is constructed fresh by the interval driver before every
//! invocation and is meaningless once that invocation returns: it carries a
//! weak back-reference to the scheduler (a lookup relation, never
//! ownership), matching Design Notes §9's "Back-reference from Event to
//! scheduler".

use std::sync::{Arc, Weak};

use crate::error::MachinaError;
use crate::execute::ExecuteHandle;
use crate::resolver::ResolvedArgs;
use crate::scheduler::Inner;

/// Handle exposing sibling-control and execute-invocation operations to a
/// running emit body.
#[derive(Clone)]
pub struct Event {
    /// 1-based iteration counter of the emit this `Event` belongs to.
    pub epoch: u64,
    /// Seconds spent in the previous body invocation (`0.0` on the first).
    pub previous_execution_time: f64,
    /// Seconds by which the previous iteration slipped past its interval
    /// (`0.0` on the first).
    pub previous_interval_delay_time: f64,
    pub(crate) bot: Weak<Inner>,
    /// Values the registered `DependencyResolver` produced for this
    /// invocation, merged in by the driver before the body is called.
    /// Wrapped in `Arc` so `Event` stays cheaply `Clone` regardless of what
    /// the resolver returns.
    pub(crate) resolved: Arc<ResolvedArgs>,
}

impl Event {
    /// Clear the named emit's `alive` flag (soft stop) or cancel its driver
    /// outright (`force = true`).
    ///
    /// A soft stop lets the current iteration's body and sleep finish
    /// before the driver exits; a forced stop cancels the driver at its
    /// current suspension point, which may be mid-sleep or mid-body.
    pub fn stop(&self, name: &str, force: bool) -> Result<(), MachinaError> {
        let bot = self.upgrade()?;
        bot.stop_emit(name, force)
    }

    /// Spawn (or re-spawn) the named emit's driver, setting `alive = true`.
    ///
    /// If a driver is already running for `name`, this logs a warning and
    /// returns `Ok(())` without spawning a second one — double-start is a
    /// no-op, not an error.
    pub fn start(&self, name: &str) -> Result<(), MachinaError> {
        let bot = self.upgrade()?;
        bot.start_emit(name)
    }

    /// Spawn a new execute invocation and return a handle the caller may
    /// await for the body's return value.
    ///
    /// Parameter-resolver injection is not applied here — `args` is passed
    /// to the body exactly as given.
    pub fn execute<A, R>(&self, name: &str, args: A) -> Result<ExecuteHandle<R>, MachinaError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let bot = self.upgrade()?;
        bot.spawn_execute(name, args)
    }

    /// Named values the resolver produced for this iteration, keyed by the
    /// name it registered them under. Empty for every `Event` the driver
    /// builds from the default `NoopResolver`.
    pub fn resolved(&self) -> &ResolvedArgs {
        &self.resolved
    }

    /// Downcast a single resolved value by name.
    pub fn get_resolved<T: 'static>(&self, key: &str) -> Option<&T> {
        self.resolved
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
    }

    fn upgrade(&self) -> Result<std::sync::Arc<Inner>, MachinaError> {
        self.bot
            .upgrade()
            .ok_or_else(|| MachinaError::Lookup("scheduler no longer exists".to_string()))
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("epoch", &self.epoch)
            .field("previous_execution_time", &self.previous_execution_time)
            .field(
                "previous_interval_delay_time",
                &self.previous_interval_delay_time,
            )
            .field("resolved_len", &self.resolved.len())
            .finish_non_exhaustive()
    }
}
