//! Periodic work records and their body contract (§3, §4.4).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BodyError;
use crate::event::Event;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An emit body: takes the iteration's [`Event`] by value (Design Notes
/// §9 — the per-body argument set is fixed at registration, so the
/// scheduler never needs to reflect on it the way the original resolver
/// does).
pub trait EmitHandler: Send + Sync {
    fn call(&self, event: Event) -> BoxFuture<Result<(), BodyError>>;
}

impl<F, Fut> EmitHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
{
    fn call(&self, event: Event) -> BoxFuture<Result<(), BodyError>> {
        Box::pin(self(event))
    }
}

/// Registration-time options for an emit (§4.3's `emit(name, count, interval,
/// alive)`).
#[derive(Debug, Clone)]
pub struct EmitOptions {
    /// `None` means unbounded (`∞` in §3).
    pub count: Option<u64>,
    pub interval: Duration,
    pub alive: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            count: None,
            interval: Duration::ZERO,
            alive: true,
        }
    }
}

/// `{ name, body, interval, alive, remaining }` (§3). `alive` is the only
/// field mutated after registration — by the scheduler on `start` and by
/// the driver when it exits; `remaining` is never stored here, each driver
/// keeps its own running copy seeded from `count`.
#[derive(Clone)]
pub struct EmitRecord {
    pub(crate) name: String,
    pub(crate) body: Arc<dyn EmitHandler>,
    pub(crate) interval: Duration,
    pub(crate) count: Option<u64>,
    pub(crate) alive: Arc<AtomicBool>,
}
