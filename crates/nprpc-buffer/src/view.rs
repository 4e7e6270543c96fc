use crate::{BufferError, OverflowPolicy};
use std::sync::Arc;

/// Called with the number of bytes committed so far, right before a
/// `DemoteToHeap` overflow copies them out of the view and switches the
/// owning `FlatBuffer` to heap storage. Typically used to flush a partial
/// shared-memory ring reservation.
pub type CommitHook = Arc<dyn Fn(usize) + Send + Sync>;

/// A `FlatBuffer` storage backend that writes directly into foreign memory
/// (e.g. a reservation returned by [`nprpc_ring`]'s `try_reserve_write`).
pub struct ViewBuffer {
    ptr: *mut u8,
    initial_offset: usize,
    capacity: usize,
    policy: OverflowPolicy,
    commit_hook: CommitHook,
}

// SAFETY: callers of `FlatBuffer::view` guarantee `ptr` is valid for the
// buffer's lifetime and not aliased; the pointer itself carries no
// thread-affinity.
unsafe impl Send for ViewBuffer {}

impl ViewBuffer {
    /// # Safety
    /// See [`crate::FlatBuffer::view`].
    pub unsafe fn new(
        ptr: *mut u8,
        initial_offset: usize,
        capacity: usize,
        policy: OverflowPolicy,
        commit_hook: CommitHook,
    ) -> Self {
        ViewBuffer {
            ptr,
            initial_offset,
            capacity,
            policy,
            commit_hook,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn commit_hook(&self) -> &CommitHook {
        &self.commit_hook
    }

    /// Whether `n` more bytes fit past the already-committed `size`.
    pub fn fits(&self, size: usize, n: usize) -> bool {
        size.saturating_add(n) <= self.capacity
    }

    /// Returns the reservation slice if it fits, `None` otherwise. Callers
    /// must check `fits`/handle overflow before calling this in a context
    /// where it must succeed.
    pub fn try_prepare(&mut self, size: usize, n: usize) -> Option<&mut [u8]> {
        if !self.fits(size, n) {
            return None;
        }
        // SAFETY: offset + size + n <= capacity, within the caller-promised region.
        unsafe {
            let start = self.ptr.add(self.initial_offset + size);
            Some(std::slice::from_raw_parts_mut(start, n))
        }
    }

    pub fn data(&mut self, size: usize) -> &mut [u8] {
        // SAFETY: size <= capacity is maintained by FlatBuffer's bookkeeping.
        unsafe {
            let start = self.ptr.add(self.initial_offset);
            std::slice::from_raw_parts_mut(start, size)
        }
    }

    pub fn cdata(&self, size: usize) -> &[u8] {
        unsafe {
            let start = self.ptr.add(self.initial_offset);
            std::slice::from_raw_parts(start, size)
        }
    }

    /// Shift the view's logical start forward by `n` bytes (the committed
    /// region shrinks from the front, same as the heap path).
    pub fn consume(&mut self, n: usize) {
        self.initial_offset += n;
        self.capacity -= n;
    }
}
