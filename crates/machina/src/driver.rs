//! The interval driver (§4.4): one task per running emit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::emit::EmitHandler;
use crate::error::BodyError;
use crate::event::Event;
use crate::resolver::DependencyResolver;
use crate::scheduler::Inner;

/// One pass of an emit's loop. Exits cleanly (returns `Ok(())`) on
/// exhausted `remaining`, a cleared `alive` flag, or cancellation; returns
/// `Err` the one time a body invocation itself fails, at which point the
/// driver does not retry and simply stops.
pub(crate) async fn run_driver(
    inner: Weak<Inner>,
    name: String,
    body: Arc<dyn EmitHandler>,
    resolver: Arc<dyn DependencyResolver>,
    interval: Duration,
    mut remaining: Option<u64>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
    slow_iteration_warning: Duration,
) -> Result<(), BodyError> {
    let slow_iteration_warning = slow_iteration_warning.as_secs_f64();
    let mut epoch: u64 = 1;
    let mut before = tokio::time::Instant::now();
    let mut prev_exec = 0.0f64;
    let mut prev_delay = 0.0f64;
    let mut first_iteration = true;

    loop {
        if remaining == Some(0) {
            return Ok(());
        }

        if !first_iteration {
            let now = tokio::time::Instant::now();
            let slip =
                now.saturating_duration_since(before).as_secs_f64() - interval.as_secs_f64();
            prev_delay = slip.max(0.0);
        }

        let resolved = match resolver.resolve().await {
            Ok(resolved) => resolved,
            Err(e) => {
                return Err(match e {
                    crate::error::MachinaError::Body(b) => b,
                    other => BodyError::new(other),
                });
            }
        };

        let event = Event {
            epoch,
            previous_execution_time: prev_exec,
            previous_interval_delay_time: prev_delay,
            bot: inner.clone(),
            resolved: Arc::new(resolved),
        };

        if prev_delay > slow_iteration_warning {
            tracing::warn!(
                emit = %name,
                delay_secs = prev_delay,
                threshold_secs = slow_iteration_warning,
                "emit iteration started later than expected"
            );
        }

        let start = tokio::time::Instant::now();
        let body_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = body.call(event) => result,
        };
        let now = tokio::time::Instant::now();
        prev_exec = now.saturating_duration_since(start).as_secs_f64();
        before = now;
        body_result?;

        epoch += 1;
        if let Some(r) = remaining.as_mut() {
            *r -= 1;
            if *r == 0 {
                return Ok(());
            }
        }

        if !alive.load(Ordering::SeqCst) {
            return Ok(());
        }

        first_iteration = false;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
