//! Blocking synchronization primitives
//!
//! [`CancellableOperation`] carries the two-condition-variable
//! cancel/acknowledge handshake used by the speaker calibration thread:
//! cancellation is requested on one condition variable and acknowledged on a
//! second, so the requester only resumes after the worker has fully torn
//! down. [`OrderedMutex`] enforces the lock hierarchy (inputs before stream
//! before device) with a thread-local acquisition stack.

use std::cell::RefCell;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Result of a cancellable timed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full wait elapsed with no cancellation
    TimedOut,
    /// Cancellation was requested during the wait
    Cancelled,
}

#[derive(Debug, Default)]
struct CancelState {
    requested: bool,
    active: bool,
}

/// A cancellation handshake between one worker and its requesters.
///
/// The worker brackets each hardware-holding episode with [`begin`] and
/// [`finish`], sleeping only through [`wait_cancellable`]. A requester calls
/// [`request_cancel`], which wakes the worker via the cancel condition
/// variable and then blocks on the separate acknowledge condition variable
/// until [`finish`] runs. Collapsing the two condition variables into one
/// would let the requester resume before teardown completes.
///
/// [`begin`]: CancellableOperation::begin
/// [`finish`]: CancellableOperation::finish
/// [`wait_cancellable`]: CancellableOperation::wait_cancellable
/// [`request_cancel`]: CancellableOperation::request_cancel
#[derive(Debug, Default)]
pub struct CancellableOperation {
    state: Mutex<CancelState>,
    cancel: Condvar,
    ack: Condvar,
}

impl CancellableOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker: mark the operation active. Clears any stale request.
    pub fn begin(&self) {
        let mut st = self.state.lock().unwrap();
        st.active = true;
        st.requested = false;
    }

    /// Worker: sleep up to `timeout`, waking early on cancellation.
    pub fn wait_cancellable(&self, timeout: Duration) -> WaitOutcome {
        let mut st = self.state.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !st.requested {
            let now = std::time::Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = self.cancel.wait_timeout(st, deadline - now).unwrap();
            st = guard;
        }
        WaitOutcome::Cancelled
    }

    /// Worker: poll the flag between hardware status checks.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().unwrap().requested
    }

    /// Worker: teardown is complete; release any waiting requesters.
    pub fn finish(&self) {
        let mut st = self.state.lock().unwrap();
        st.active = false;
        st.requested = false;
        self.ack.notify_all();
    }

    /// Requester: demand cancellation and block until the worker has
    /// acknowledged by finishing teardown. Returns immediately when no
    /// operation is active.
    pub fn request_cancel(&self) {
        let mut st = self.state.lock().unwrap();
        if !st.active {
            return;
        }
        st.requested = true;
        self.cancel.notify_all();
        while st.active {
            st = self.ack.wait(st).unwrap();
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }
}

/// Lock ranks of the routing core, lowest acquired first.
pub mod lock_rank {
    /// Global input-stream lifecycle lock
    pub const INPUTS: u16 = 10;
    /// Individual stream locks (owned by the stream layer)
    pub const STREAM: u16 = 20;
    /// Device-level routing lock, always last
    pub const DEVICE: u16 = 40;
}

thread_local! {
    static LOCK_STACK: RefCell<Vec<u16>> = const { RefCell::new(Vec::new()) };
}

/// A mutex with a place in the lock hierarchy.
///
/// Acquiring an `OrderedMutex` whose rank is not strictly greater than the
/// highest rank already held on this thread panics, turning latent deadlock
/// cycles into immediate test failures.
#[derive(Debug, Default)]
pub struct OrderedMutex<T> {
    rank: u16,
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    pub fn new(rank: u16, name: &'static str, value: T) -> Self {
        Self {
            rank,
            name,
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> OrderedGuard<'_, T> {
        LOCK_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(&top) = stack.last() {
                assert!(
                    self.rank > top,
                    "lock order violation: acquiring '{}' (rank {}) while holding rank {}",
                    self.name,
                    self.rank,
                    top
                );
            }
            stack.push(self.rank);
        });
        OrderedGuard {
            guard: self.inner.lock().unwrap(),
        }
    }

    pub fn rank(&self) -> u16 {
        self.rank
    }
}

/// Guard for an [`OrderedMutex`]; pops the rank stack on release.
pub struct OrderedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> std::ops::Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        LOCK_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Ranks currently held by this thread, outermost first. Test support.
pub fn held_ranks() -> Vec<u16> {
    LOCK_STACK.with(|stack| stack.borrow().clone())
}
