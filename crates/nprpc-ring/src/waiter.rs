//! The sleep/wake side-channel for an otherwise lock-free ring.
//!
//! The fast path (`try_reserve_write`/`try_read_view`) never touches a
//! `RingWaiter`. It exists purely so a reader can block instead of
//! busy-spinning when the ring is empty, and so a writer can block when the
//! ring is full. Implementations differ between same-process rings
//! (`LocalWaiter`, backed by `parking_lot`) and cross-process shared-memory
//! rings (a `PTHREAD_PROCESS_SHARED` pair, provided by `nprpc-shm`).

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Blocking wake/wait primitive used to let a ring's reader or writer sleep.
pub trait RingWaiter: Send + Sync {
    /// Block until `notify_data` is called or `timeout` elapses. Spurious
    /// wakeups are allowed — callers re-check the ring state after waking.
    fn wait_for_data(&self, timeout: Duration);
    /// Wake any thread blocked in `wait_for_data`.
    fn notify_data(&self);
    /// Block until `notify_space` is called or `timeout` elapses.
    fn wait_for_space(&self, timeout: Duration);
    /// Wake any thread blocked in `wait_for_space`.
    fn notify_space(&self);
}

/// A `RingWaiter` for rings that never leave the current process (the
/// in-process transport, and unit tests). Not valid to place in shared
/// memory — `Mutex`/`Condvar` here carry process-local addresses.
#[derive(Default)]
pub struct LocalWaiter {
    data: (Mutex<()>, Condvar),
    space: (Mutex<()>, Condvar),
}

impl LocalWaiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RingWaiter for LocalWaiter {
    fn wait_for_data(&self, timeout: Duration) {
        let mut guard = self.data.0.lock();
        self.data.1.wait_for(&mut guard, timeout);
    }

    fn notify_data(&self) {
        self.data.1.notify_all();
    }

    fn wait_for_space(&self, timeout: Duration) {
        let mut guard = self.space.0.lock();
        self.space.1.wait_for(&mut guard, timeout);
    }

    fn notify_space(&self) {
        self.space.1.notify_all();
    }
}
