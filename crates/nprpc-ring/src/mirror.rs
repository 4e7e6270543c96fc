//! Mirror-mapped memory window: two virtual mappings of the same physical
//! pages placed back to back, so that `[0, B)` and `[B, 2B)` both refer to
//! the same `B` bytes. A read or write at any offset `o` of length `L <= B`
//! is then always contiguous in the caller's address space, even when the
//! ring's logical position straddles the wraparound point.

use crate::RingError;
use std::os::unix::io::RawFd;

/// Owns a `2 * capacity`-byte double mapping over `fd`. `fd` must already be
/// sized to at least `capacity` bytes (via `ftruncate`) and must support
/// `MAP_SHARED` (a `shm_open` or `memfd_create` descriptor).
pub struct MirrorMap {
    base: *mut u8,
    capacity: usize,
}

// SAFETY: the mapping is valid for the lifetime of this struct and `base`
// points at memory, not at thread-local state.
unsafe impl Send for MirrorMap {}
unsafe impl Sync for MirrorMap {}

impl MirrorMap {
    /// Equivalent to [`Self::new_at`] with `file_offset = 0`.
    pub fn new(fd: RawFd, capacity: usize) -> Result<Self, RingError> {
        Self::new_at(fd, 0, capacity)
    }

    /// Reserve `2 * capacity` bytes of address space, then map the
    /// `capacity`-byte region of `fd` starting at `file_offset` twice into
    /// it: once at `base` and once at `base + capacity`, both `MAP_SHARED`
    /// so writes through either mapping are visible through the other
    /// (and, for a `shm_open`-backed fd, in any other process that maps the
    /// same object). `file_offset` lets a data window share a single shm
    /// object with a preceding fixed-size header region.
    pub fn new_at(fd: RawFd, file_offset: i64, capacity: usize) -> Result<Self, RingError> {
        assert!(capacity > 0, "ring capacity must be non-zero");

        // SAFETY: reserving address space with PROT_NONE, no aliasing yet.
        let reservation = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity * 2,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if reservation == libc::MAP_FAILED {
            return Err(RingError::Mmap(std::io::Error::last_os_error()));
        }
        let base = reservation as *mut u8;

        // SAFETY: `base` and `base + capacity` both fall inside the
        // reservation above; MAP_FIXED replaces the PROT_NONE placeholder.
        let first = unsafe {
            libc::mmap(
                base as *mut libc::c_void,
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd,
                file_offset,
            )
        };
        if first == libc::MAP_FAILED {
            unsafe { libc::munmap(base as *mut libc::c_void, capacity * 2) };
            return Err(RingError::Mmap(std::io::Error::last_os_error()));
        }

        let second = unsafe {
            libc::mmap(
                base.add(capacity) as *mut libc::c_void,
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd,
                file_offset,
            )
        };
        if second == libc::MAP_FAILED {
            unsafe { libc::munmap(base as *mut libc::c_void, capacity * 2) };
            return Err(RingError::Mmap(std::io::Error::last_os_error()));
        }

        Ok(MirrorMap { base, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A contiguous slice of `len` bytes starting at ring-relative offset
    /// `offset % capacity`. Valid for any `len <= capacity` regardless of
    /// whether it straddles the physical wraparound point.
    ///
    /// # Safety
    /// Caller must ensure `len <= capacity` and that no other live
    /// reference aliases this range (enforced by the ring's reservation
    /// protocol, not by this method).
    pub unsafe fn slice_mut(&self, offset: u64, len: usize) -> &mut [u8] {
        debug_assert!(len <= self.capacity);
        let start = (offset % self.capacity as u64) as usize;
        unsafe { std::slice::from_raw_parts_mut(self.base.add(start), len) }
    }

    /// # Safety
    /// Same preconditions as [`Self::slice_mut`].
    pub unsafe fn slice(&self, offset: u64, len: usize) -> &[u8] {
        debug_assert!(len <= self.capacity);
        let start = (offset % self.capacity as u64) as usize;
        unsafe { std::slice::from_raw_parts(self.base.add(start), len) }
    }
}

impl Drop for MirrorMap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.capacity * 2);
        }
    }
}

/// Create an anonymous, unlinked POSIX shared-memory object sized to
/// `capacity` bytes, suitable for backing an in-process (non-shared)
/// [`MirrorMap`] — e.g. for tests or the in-process transport, where the
/// ring never needs to be opened by another process.
pub fn anonymous_fd(capacity: usize) -> Result<RawFd, RingError> {
    let name = format!("/nprpc-anon-{}\0", std::process::id() as u64 * 0x1_0000 + rand_suffix());
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr() as *const libc::c_char,
            libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
            0o600,
        )
    };
    if fd < 0 {
        return Err(RingError::Mmap(std::io::Error::last_os_error()));
    }
    // SAFETY: fd freshly created above.
    unsafe {
        libc::shm_unlink(name.as_ptr() as *const libc::c_char);
        if libc::ftruncate(fd, capacity as libc::off_t) != 0 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(RingError::Mmap(err));
        }
    }
    Ok(fd)
}

/// A cheap, non-cryptographic per-process counter used only to keep
/// anonymous shm names unique within this process's lifetime.
fn rand_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
