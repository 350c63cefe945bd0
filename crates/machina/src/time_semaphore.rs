//! A hybrid counting semaphore: a hard concurrency cap combined with a
//! leaky-bucket-style sliding-window rate limit (§4.2).
//!
//! Waiters queue in `std::sync::Mutex`-guarded FIFO order (no `.await` is
//! ever held across the lock). A waiter always subscribes to
//! [`Notify::notified`] *before* re-checking the rule, so a release or
//! rate-window expiry that happens between the check and the subscribe is
//! never missed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct State {
    in_flight: usize,
    release_times: VecDeque<Instant>,
    waiters: VecDeque<u64>,
    alarm_pending: bool,
}

struct Inner {
    entire_cap: Option<usize>,
    window: Duration,
    window_cap: usize,
    state: Mutex<State>,
    notify: Notify,
    next_ticket: AtomicU64,
}

impl Inner {
    fn rule_holds(&self, st: &State) -> bool {
        let cap_ok = match self.entire_cap {
            Some(cap) => st.in_flight < cap,
            None => true,
        };
        let rate_ok = if self.window.is_zero() {
            true
        } else {
            st.release_times.len() < self.window_cap
        };
        cap_ok && rate_ok
    }

    fn evict_expired(&self, st: &mut State, now: Instant) {
        if self.window.is_zero() {
            return;
        }
        while let Some(&front) = st.release_times.front() {
            if now.saturating_duration_since(front) >= self.window {
                st.release_times.pop_front();
            } else {
                break;
            }
        }
    }

    /// If the only thing blocking admission is the rate window, schedule a
    /// one-shot wake for the moment it is expected to clear. Concurrency-cap
    /// blocks need no alarm — only a `release()` can ever clear those.
    fn schedule_alarm_if_needed(self: &Arc<Self>, st: &mut State) {
        if self.window.is_zero() || st.alarm_pending {
            return;
        }
        let Some(&oldest) = st.release_times.front() else {
            return;
        };
        if st.release_times.len() < self.window_cap {
            return;
        }
        st.alarm_pending = true;
        let deadline = oldest + self.window;
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut st = inner.state.lock().expect("time semaphore mutex poisoned");
                st.alarm_pending = false;
            }
            inner.notify.notify_waiters();
        });
    }

    fn release(&self) {
        let now = Instant::now();
        {
            let mut st = self.state.lock().expect("time semaphore mutex poisoned");
            st.in_flight -= 1;
            if !self.window.is_zero() {
                st.release_times.push_back(now);
            }
        }
        self.notify.notify_waiters();
    }
}

/// A dual-limit gate: `entire_cap` caps simultaneous holders, `window`/
/// `window_cap` cap how many acquisitions may *complete* in any trailing
/// window of that duration.
///
/// Cloning shares the same underlying gate (it is an `Arc` handle), the way
/// `tokio::sync::Semaphore` and this crate's `ConcurrentGroup` are shared.
#[derive(Clone)]
pub struct TimeSemaphore {
    inner: Arc<Inner>,
}

/// Held while inside the gated critical section. Dropping it (on any exit
/// path — normal return, `?`, or task cancellation) runs the release rule
/// and wakes the next eligible waiter.
pub struct Permit {
    inner: Arc<Inner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

/// RAII guard for an enqueued-but-not-yet-acquired waiter.
///
/// If the `acquire()` future is dropped while parked, this removes the
/// waiter's ticket from the FIFO queue so it never blocks anyone else and
/// wakes the next candidate — the no-token-leaked half of §4.2's
/// cancellation semantics. `armed` is cleared the instant the ticket is
/// actually consumed by a successful acquisition.
struct TicketGuard {
    inner: Arc<Inner>,
    ticket: u64,
    armed: bool,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = self.inner.state.lock().expect("time semaphore mutex poisoned");
        if let Some(pos) = st.waiters.iter().position(|t| *t == self.ticket) {
            st.waiters.remove(pos);
        }
        drop(st);
        self.inner.notify.notify_waiters();
    }
}

impl TimeSemaphore {
    /// `entire_cap = None` disables the concurrency limit. `window =
    /// Duration::ZERO` disables the rate limit (`window_cap` is then
    /// unused). Both disabled makes this a pass-through gate.
    pub fn new(entire_cap: Option<usize>, window: Duration, window_cap: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                entire_cap,
                window,
                window_cap: window_cap.max(1),
                state: Mutex::new(State {
                    in_flight: 0,
                    release_times: VecDeque::new(),
                    waiters: VecDeque::new(),
                    alarm_pending: false,
                }),
                notify: Notify::new(),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Current number of holders inside the critical section. For tests and
    /// monitoring only.
    pub fn in_flight(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("time semaphore mutex poisoned")
            .in_flight
    }

    /// Suspend until both the concurrency cap and the rate window admit this
    /// caller, then return a [`Permit`] whose `Drop` releases the slot.
    pub async fn acquire(&self) -> Permit {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut st = self.inner.state.lock().expect("time semaphore mutex poisoned");
            st.waiters.push_back(ticket);
        }
        let mut guard = TicketGuard {
            inner: Arc::clone(&self.inner),
            ticket,
            armed: true,
        };

        loop {
            let notified = self.inner.notify.notified();
            {
                let mut st = self.inner.state.lock().expect("time semaphore mutex poisoned");
                let now = Instant::now();
                self.inner.evict_expired(&mut st, now);

                let is_front = st.waiters.front() == Some(&ticket);
                if is_front && self.inner.rule_holds(&st) {
                    st.waiters.pop_front();
                    st.in_flight += 1;
                    guard.armed = false;
                    drop(st);
                    // Wake the new front immediately in case it can also proceed.
                    self.inner.notify.notify_waiters();
                    return Permit {
                        inner: Arc::clone(&self.inner),
                    };
                }
                self.inner.schedule_alarm_if_needed(&mut st);
            }
            notified.await;
        }
    }

    /// Run `f` under the gate, releasing the slot as soon as the produced
    /// future resolves — the scoped-acquisition style §4.2 calls the
    /// "decorator" use of a `TimeSemaphore`.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }
}
