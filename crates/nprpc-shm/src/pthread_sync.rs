//! Cross-process wake/wait primitives for a ring that lives in shared
//! memory. `parking_lot`'s `Mutex`/`Condvar` (used by `nprpc_ring::LocalWaiter`)
//! embed process-local state and can't be placed in a segment mapped by two
//! different processes; a real `PTHREAD_PROCESS_SHARED` mutex and condition
//! variable can.

use nprpc_ring::RingWaiter;
use std::mem::MaybeUninit;
use std::time::Duration;

/// Raw, process-shared mutex/condvar pair for one wait condition (either
/// "data available" or "space available"). Must be placed in shared memory
/// and initialized exactly once by whichever side creates the segment;
/// the other side simply maps over the already-initialized bytes.
#[repr(C)]
pub struct RawCondition {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
}

impl RawCondition {
    /// Initialize `self` in place with `PTHREAD_PROCESS_SHARED` attributes.
    /// Must be called exactly once, by the segment's creator, before any
    /// other process maps it.
    ///
    /// # Safety
    /// `self` must be freshly mapped, zero-or-garbage-filled shared memory
    /// big enough for `RawCondition`, not concurrently accessed by anyone
    /// else while initialization runs.
    pub unsafe fn init_in_place(this: *mut RawCondition) {
        unsafe {
            let mut mattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            libc::pthread_mutexattr_init(mattr.as_mut_ptr());
            libc::pthread_mutexattr_setpshared(mattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
            libc::pthread_mutex_init(std::ptr::addr_of_mut!((*this).mutex), mattr.as_ptr());
            libc::pthread_mutexattr_destroy(mattr.as_mut_ptr());

            let mut cattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            libc::pthread_condattr_init(cattr.as_mut_ptr());
            libc::pthread_condattr_setpshared(cattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
            libc::pthread_cond_init(std::ptr::addr_of_mut!((*this).cond), cattr.as_ptr());
            libc::pthread_condattr_destroy(cattr.as_mut_ptr());
        }
    }

    fn wait(&self, timeout: Duration) {
        unsafe {
            let mutex = std::ptr::addr_of!(self.mutex) as *mut _;
            let cond = std::ptr::addr_of!(self.cond) as *mut _;
            libc::pthread_mutex_lock(mutex);
            let mut ts = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
            ts.tv_sec += timeout.as_secs() as libc::time_t;
            ts.tv_nsec += i64::from(timeout.subsec_nanos());
            if ts.tv_nsec >= 1_000_000_000 {
                ts.tv_sec += 1;
                ts.tv_nsec -= 1_000_000_000;
            }
            // Spurious and timed-out wakeups are both fine: the ring's
            // caller re-checks the atomics after returning.
            libc::pthread_cond_timedwait(cond, mutex, &ts);
            libc::pthread_mutex_unlock(mutex);
        }
    }

    fn notify(&self) {
        unsafe {
            let mutex = std::ptr::addr_of!(self.mutex) as *mut _;
            let cond = std::ptr::addr_of!(self.cond) as *mut _;
            libc::pthread_mutex_lock(mutex);
            libc::pthread_cond_broadcast(cond);
            libc::pthread_mutex_unlock(mutex);
        }
    }
}

/// The two `RawCondition`s a ring needs: one signaled on write, one on read.
/// Laid out so it can be embedded directly after a ring's header in a
/// shared-memory control page.
#[repr(C)]
pub struct RawConditionPair {
    pub data: RawCondition,
    pub space: RawCondition,
}

impl RawConditionPair {
    /// # Safety
    /// See [`RawCondition::init_in_place`]; applies to both members.
    pub unsafe fn init_in_place(this: *mut RawConditionPair) {
        unsafe {
            RawCondition::init_in_place(std::ptr::addr_of_mut!((*this).data));
            RawCondition::init_in_place(std::ptr::addr_of_mut!((*this).space));
        }
    }
}

/// A [`RingWaiter`] backed by a `RawConditionPair` that lives in shared
/// memory, pointed to (not owned) by this handle.
pub struct SharedWaiter {
    conditions: *const RawConditionPair,
}

// SAFETY: `conditions` points into a shared-memory mapping kept alive by
// the owning `ShmRing`/`Channel` for at least as long as this handle.
unsafe impl Send for SharedWaiter {}
unsafe impl Sync for SharedWaiter {}

impl SharedWaiter {
    /// # Safety
    /// `conditions` must point at an already-initialized `RawConditionPair`
    /// that outlives this `SharedWaiter`.
    pub unsafe fn new(conditions: *const RawConditionPair) -> Self {
        SharedWaiter { conditions }
    }

    fn pair(&self) -> &RawConditionPair {
        unsafe { &*self.conditions }
    }
}

impl RingWaiter for SharedWaiter {
    fn wait_for_data(&self, timeout: Duration) {
        self.pair().data.wait(timeout);
    }

    fn notify_data(&self) {
        self.pair().data.notify();
    }

    fn wait_for_space(&self, timeout: Duration) {
        self.pair().space.wait(timeout);
    }

    fn notify_space(&self) {
        self.pair().space.notify();
    }
}
