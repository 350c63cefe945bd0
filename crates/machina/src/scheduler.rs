//! The scheduler (§4.3): registries, task accounting, and `run()`.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MachinaConfig;
use crate::emit::{EmitHandler, EmitOptions, EmitRecord};
use crate::error::{BodyError, MachinaError};
use crate::event::Event;
use crate::execute::{into_execute_handler, ExecuteHandle, ExecuteRecord};
use crate::group::{ConcurrentGroup, GroupLimits};
use crate::resolver::{DependencyResolver, NoopResolver};

struct DriverSlot {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A detached, cloneable summary of an error already moved elsewhere (e.g.
/// into an `ExecuteHandle`'s own `Result`), used only for the scheduler's
/// first-error fail-fast slot.
#[derive(Debug)]
struct DetachedError(String);

impl std::fmt::Display for DetachedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DetachedError {}

pub(crate) struct Inner {
    emits: Mutex<HashMap<String, EmitRecord>>,
    executes: Mutex<HashMap<String, ExecuteRecord>>,
    groups: Mutex<HashMap<String, ConcurrentGroup>>,
    drivers: Mutex<HashMap<String, DriverSlot>>,
    execute_tasks: Mutex<HashMap<String, HashSet<u64>>>,
    next_task_id: AtomicU64,
    unfinished: Mutex<u64>,
    finished: Notify,
    first_error: Mutex<Option<MachinaError>>,
    resolver: Arc<dyn DependencyResolver>,
    root_cancel: CancellationToken,
    config: MachinaConfig,
}

impl Inner {
    fn incr_unfinished(&self) {
        *self.unfinished.lock().expect("unfinished mutex poisoned") += 1;
    }

    fn decr_unfinished(&self) {
        let mut n = self.unfinished.lock().expect("unfinished mutex poisoned");
        *n -= 1;
        let reached_zero = *n == 0;
        drop(n);
        if reached_zero {
            self.finished.notify_waiters();
        }
    }

    fn record_error(&self, err: Option<MachinaError>) {
        if let Some(err) = err {
            let mut first = self.first_error.lock().expect("first_error mutex poisoned");
            if first.is_none() {
                *first = Some(err);
            }
        }
    }

    pub(crate) fn start_emit(self: &Arc<Self>, name: &str) -> Result<(), MachinaError> {
        let record = {
            let emits = self.emits.lock().expect("emits mutex poisoned");
            emits
                .get(name)
                .cloned()
                .ok_or_else(|| MachinaError::Lookup(format!("no such emit: {name}")))?
        };

        {
            let drivers = self.drivers.lock().expect("drivers mutex poisoned");
            if let Some(slot) = drivers.get(name) {
                if !slot.handle.is_finished() {
                    tracing::warn!(emit = %name, "start() called on an already-running emit; ignoring");
                    return Ok(());
                }
            }
        }
        self.drivers
            .lock()
            .expect("drivers mutex poisoned")
            .remove(name);

        record.alive.store(true, Ordering::SeqCst);
        let cancel = self.root_cancel.child_token();
        self.incr_unfinished();

        let inner = Arc::clone(self);
        let driver_cancel = cancel.clone();
        let name_owned = name.to_string();
        let body = Arc::clone(&record.body);
        let resolver = Arc::clone(&self.resolver);
        let interval = record.interval;
        let count = record.count;
        let alive = Arc::clone(&record.alive);
        let slow_iteration_warning = self.config.slow_iteration_warning;

        let handle = tokio::spawn(async move {
            let weak_inner = Arc::downgrade(&inner);
            let result = crate::driver::run_driver(
                weak_inner,
                name_owned.clone(),
                body,
                resolver,
                interval,
                count,
                alive.clone(),
                driver_cancel,
                slow_iteration_warning,
            )
            .await;

            alive.store(false, Ordering::SeqCst);
            {
                let mut drivers = inner.drivers.lock().expect("drivers mutex poisoned");
                drivers.remove(&name_owned);
            }
            inner.record_error(result.err().map(MachinaError::Body));
            inner.decr_unfinished();
        });

        self.drivers
            .lock()
            .expect("drivers mutex poisoned")
            .insert(name.to_string(), DriverSlot { cancel, handle });
        Ok(())
    }

    pub(crate) fn stop_emit(&self, name: &str, force: bool) -> Result<(), MachinaError> {
        let exists = self
            .emits
            .lock()
            .expect("emits mutex poisoned")
            .contains_key(name);
        if !exists {
            return Err(MachinaError::Lookup(format!("no such emit: {name}")));
        }

        if force {
            let drivers = self.drivers.lock().expect("drivers mutex poisoned");
            if let Some(slot) = drivers.get(name) {
                slot.cancel.cancel();
            }
        } else {
            let emits = self.emits.lock().expect("emits mutex poisoned");
            if let Some(record) = emits.get(name) {
                record.alive.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    pub(crate) fn spawn_execute<A, R>(
        self: &Arc<Self>,
        name: &str,
        args: A,
    ) -> Result<ExecuteHandle<R>, MachinaError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let record = {
            let executes = self.executes.lock().expect("executes mutex poisoned");
            executes
                .get(name)
                .cloned()
                .ok_or_else(|| MachinaError::Lookup(format!("no such execute: {name}")))?
        };

        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.execute_tasks
            .lock()
            .expect("execute_tasks mutex poisoned")
            .entry(name.to_string())
            .or_default()
            .insert(task_id);

        self.incr_unfinished();
        let inner = Arc::clone(self);
        let name_owned = name.to_string();

        let handle: JoinHandle<Result<R, MachinaError>> = tokio::spawn(async move {
            let mut permits = Vec::with_capacity(record.groups.len());
            for group in &record.groups {
                permits.push(group.acquire().await);
            }

            let boxed_args: Box<dyn Any + Send> = Box::new(args);
            let call_result = record.body.call(boxed_args).await;
            drop(permits);

            let result = match call_result {
                Ok(boxed) => {
                    let out = *boxed.downcast::<R>().unwrap_or_else(|_| {
                        panic!("execute '{name_owned}' returned a mismatched type")
                    });
                    Ok(out)
                }
                Err(e) => {
                    let summary = e.to_string();
                    inner.record_error(Some(MachinaError::Body(BodyError::new(
                        DetachedError(summary),
                    ))));
                    Err(MachinaError::Body(e))
                }
            };

            {
                let mut tasks = inner
                    .execute_tasks
                    .lock()
                    .expect("execute_tasks mutex poisoned");
                if let Some(set) = tasks.get_mut(&name_owned) {
                    set.remove(&task_id);
                }
            }
            inner.decr_unfinished();
            result
        });

        Ok(ExecuteHandle { inner: handle })
    }

    pub(crate) async fn run(self: &Arc<Self>) -> Result<(), MachinaError> {
        let alive_names: Vec<String> = {
            let emits = self.emits.lock().expect("emits mutex poisoned");
            emits
                .iter()
                .filter(|(_, record)| record.alive.load(Ordering::SeqCst))
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in alive_names {
            self.start_emit(&name)?;
        }

        loop {
            let notified = self.finished.notified();
            if *self.unfinished.lock().expect("unfinished mutex poisoned") == 0 {
                break;
            }
            notified.await;
        }

        if let Some(err) = self
            .first_error
            .lock()
            .expect("first_error mutex poisoned")
            .take()
        {
            return Err(err);
        }
        Ok(())
    }
}

/// The orchestration runtime itself: owns every registered emit, execute,
/// and concurrent group, and drives them to completion via [`Machina::run`].
///
/// Cheap to clone — it is an `Arc` handle, matching `ConcurrentGroup` and
/// `TimeSemaphore`'s sharing model.
#[derive(Clone)]
pub struct Machina {
    pub(crate) inner: Arc<Inner>,
}

impl Default for Machina {
    fn default() -> Self {
        Self::new()
    }
}

impl Machina {
    /// A scheduler with a [`NoopResolver`] and default [`MachinaConfig`].
    pub fn new() -> Self {
        Self::with_resolver(NoopResolver)
    }

    /// A scheduler that asks `resolver` for extra arguments before every
    /// emit iteration (§4.7).
    pub fn with_resolver<R>(resolver: R) -> Self
    where
        R: DependencyResolver + 'static,
    {
        Self::with_resolver_and_config(resolver, MachinaConfig::default())
    }

    /// Full control over both the resolver and the ambient [`MachinaConfig`].
    pub fn with_resolver_and_config<R>(resolver: R, config: MachinaConfig) -> Self
    where
        R: DependencyResolver + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                emits: Mutex::new(HashMap::new()),
                executes: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                drivers: Mutex::new(HashMap::new()),
                execute_tasks: Mutex::new(HashMap::new()),
                next_task_id: AtomicU64::new(0),
                unfinished: Mutex::new(0),
                finished: Notify::new(),
                first_error: Mutex::new(None),
                resolver: Arc::new(resolver),
                root_cancel: CancellationToken::new(),
                config,
            }),
        }
    }

    /// Register a named concurrent group. Fails if `name` is already taken
    /// (§4.3).
    pub fn create_concurrent_group(
        &self,
        name: impl Into<String>,
        mut limits: GroupLimits,
    ) -> Result<ConcurrentGroup, MachinaError> {
        let name = name.into();
        let mut groups = self.inner.groups.lock().expect("groups mutex poisoned");
        if groups.contains_key(&name) {
            return Err(MachinaError::Registration(format!(
                "concurrent group '{name}' already registered"
            )));
        }
        if !limits.window.is_zero() && limits.window_cap == 0 {
            limits.window_cap = self.inner.config.default_window_cap;
        }
        let group = ConcurrentGroup::new(name.clone(), limits);
        groups.insert(name.clone(), group.clone());
        tracing::debug!(group = %name, "registered concurrent group");
        Ok(group)
    }

    /// Register a periodic body (§4.3). Fails if `name` is already
    /// registered among emits.
    pub fn emit<F, Fut>(
        &self,
        name: impl Into<String>,
        options: EmitOptions,
        body: F,
    ) -> Result<(), MachinaError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
    {
        let name = name.into();
        let mut emits = self.inner.emits.lock().expect("emits mutex poisoned");
        if emits.contains_key(&name) {
            return Err(MachinaError::Registration(format!(
                "emit '{name}' already registered"
            )));
        }
        let alive = Arc::new(AtomicBool::new(options.alive));
        emits.insert(
            name.clone(),
            EmitRecord {
                name: name.clone(),
                body: Arc::new(body),
                interval: options.interval,
                count: options.count,
                alive,
            },
        );
        tracing::debug!(emit = %name, "registered emit");
        Ok(())
    }

    /// Register an on-demand body, gated by the named concurrent groups in
    /// the given order (§4.3). Fails if `name` is already registered among
    /// executes, or if any named group is unknown.
    pub fn execute<A, R, F, Fut>(
        &self,
        name: impl Into<String>,
        groups: &[&str],
        body: F,
    ) -> Result<(), MachinaError>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BodyError>> + Send + 'static,
    {
        let name = name.into();
        let mut executes = self.inner.executes.lock().expect("executes mutex poisoned");
        if executes.contains_key(&name) {
            return Err(MachinaError::Registration(format!(
                "execute '{name}' already registered"
            )));
        }

        let resolved_groups = {
            let registered = self.inner.groups.lock().expect("groups mutex poisoned");
            groups
                .iter()
                .map(|group_name| {
                    registered.get(*group_name).cloned().ok_or_else(|| {
                        MachinaError::Registration(format!(
                            "unknown concurrent group '{group_name}'"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        executes.insert(
            name.clone(),
            ExecuteRecord {
                name: name.clone(),
                body: into_execute_handler(body),
                groups: resolved_groups,
            },
        );
        tracing::debug!(execute = %name, "registered execute");
        Ok(())
    }

    /// Spawn one interval-driver task per currently-alive emit and suspend
    /// until every spawned task (drivers and executes alike) has finished
    /// (§4.3). Propagates the first `BodyError` raised by any of them.
    pub async fn run(&self) -> Result<(), MachinaError> {
        self.inner.run().await
    }

    /// Build a top-level [`Event`] outside of any driver iteration, for
    /// callers that want to `start`/`stop`/`execute` before calling
    /// [`Machina::run`]. `epoch` is fixed at `0` to signal it did not come
    /// from a driver's iteration.
    pub fn event(&self) -> Event {
        Event {
            epoch: 0,
            previous_execution_time: 0.0,
            previous_interval_delay_time: 0.0,
            bot: Arc::downgrade(&self.inner),
            resolved: Arc::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BodyError;

    #[tokio::test]
    async fn duplicate_names_are_rejected_across_all_three_registries() {
        let bot = Machina::new();
        bot.create_concurrent_group("g", GroupLimits::default()).unwrap();
        assert!(bot
            .create_concurrent_group("g", GroupLimits::default())
            .is_err());

        bot.emit("e", EmitOptions::default(), |_event| async { Ok::<(), BodyError>(()) })
            .unwrap();
        assert!(bot
            .emit("e", EmitOptions::default(), |_event| async { Ok::<(), BodyError>(()) })
            .is_err());

        bot.execute::<(), (), _, _>("x", &[], |_| async { Ok::<(), BodyError>(()) })
            .unwrap();
        assert!(bot
            .execute::<(), (), _, _>("x", &[], |_| async { Ok::<(), BodyError>(()) })
            .is_err());
    }

    #[tokio::test]
    async fn a_window_cap_of_zero_falls_back_to_the_ambient_config_default() {
        let config = MachinaConfig {
            default_window_cap: 2,
            ..MachinaConfig::default()
        };
        let bot = Machina::with_resolver_and_config(NoopResolver, config);
        let group = bot
            .create_concurrent_group(
                "rated",
                GroupLimits {
                    entire_cap: None,
                    window: std::time::Duration::from_secs(60),
                    window_cap: 0,
                },
            )
            .unwrap();

        // Two acquisitions should be admitted immediately (default_window_cap
        // substituted for the unspecified 0); a third must queue behind the
        // rate window, since the first two permits are still held.
        let first = group.acquire().await;
        let second = group.acquire().await;
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(20), group.acquire()).await;
        assert!(blocked.is_err(), "third acquisition should have queued");
        drop((first, second));
    }

    #[tokio::test]
    async fn unknown_execute_group_name_fails_registration() {
        let bot = Machina::new();
        let err = bot
            .execute::<(), (), _, _>("x", &["missing"], |_| async { Ok::<(), BodyError>(()) })
            .unwrap_err();
        assert!(matches!(err, MachinaError::Registration(_)));
    }

    #[tokio::test]
    async fn run_with_no_alive_emits_completes_immediately() {
        let bot = Machina::new();
        bot.emit(
            "dormant",
            EmitOptions {
                alive: false,
                ..Default::default()
            },
            |_event| async { Ok::<(), BodyError>(()) },
        )
        .unwrap();
        bot.run().await.unwrap();
    }

    #[tokio::test]
    async fn execute_task_count_is_included_in_unfinished_accounting() {
        let bot = Machina::new();
        let seen = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&seen);
        bot.execute::<(), (), _, _>("noop", &[], move |_| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BodyError>(())
            }
        })
        .unwrap();

        bot.emit(
            "trigger",
            EmitOptions {
                count: Some(1),
                ..Default::default()
            },
            move |event| async move {
                event.execute::<(), ()>("noop", ()).unwrap().await.unwrap();
                Ok::<(), BodyError>(())
            },
        )
        .unwrap();

        bot.run().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

