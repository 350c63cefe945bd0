//! Named concurrent groups (§3): a name plus the [`TimeSemaphore`] it owns.

use std::sync::Arc;
use std::time::Duration;

use crate::time_semaphore::{Permit, TimeSemaphore};

/// A named handle wrapping one `TimeSemaphore`. Immutable after
/// registration; cheap to clone (shares the underlying gate).
#[derive(Clone)]
pub struct ConcurrentGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: String,
    sem: TimeSemaphore,
}

/// `{ entire_cap, window, window_cap }` (§6). `entire_cap = None` is
/// unbounded concurrency; `window = Duration::ZERO` disables the rate
/// limit, in which case `window_cap` is unused. `window_cap = 0` with a
/// nonzero `window` means "no explicit cap" —
/// [`crate::scheduler::Machina::create_concurrent_group`] substitutes
/// [`crate::config::MachinaConfig::default_window_cap`] in that case.
#[derive(Debug, Clone, Copy)]
pub struct GroupLimits {
    pub entire_cap: Option<usize>,
    pub window: Duration,
    pub window_cap: usize,
}

impl Default for GroupLimits {
    fn default() -> Self {
        Self {
            entire_cap: None,
            window: Duration::ZERO,
            window_cap: 1,
        }
    }
}

impl ConcurrentGroup {
    pub(crate) fn new(name: impl Into<String>, limits: GroupLimits) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                sem: TimeSemaphore::new(limits.entire_cap, limits.window, limits.window_cap),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn acquire(&self) -> Permit {
        self.inner.sem.acquire().await
    }
}
