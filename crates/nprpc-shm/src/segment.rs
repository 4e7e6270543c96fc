//! Backing storage for one direction of a channel: a named POSIX shared
//! memory object laid out as `[control page][mirrored data window]`. The
//! control page holds the ring's header (buffer_size, max_message_size,
//! write_idx, read_idx) immediately followed by the
//! [`RawConditionPair`](crate::pthread_sync::RawConditionPair) used to let
//! an idle reader or a stalled writer sleep.

use crate::pthread_sync::{RawConditionPair, SharedWaiter};
use crate::ShmError;
use nprpc_ring::{MirrorMap, Ring, RingHeader};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

/// Control page size; generously larger than `size_of::<ControlLayout>()`
/// and matches the common page size so the data window that follows starts
/// on a page boundary (required by the double-mmap trick).
const CONTROL_PAGE_SIZE: usize = 4096;

#[repr(C)]
struct ControlLayout {
    header: RingHeader,
    conditions: RawConditionPair,
}

const _: () = assert!(std::mem::size_of::<ControlLayout>() <= CONTROL_PAGE_SIZE);

/// Whether this process is the one that creates (and therefore
/// initializes) a ring segment, or the one that attaches to an
/// already-initialized one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Create,
    Open,
}

struct ControlMapping {
    ptr: *mut u8,
}

// SAFETY: points at a shared memory mapping, not thread-local state.
unsafe impl Send for ControlMapping {}
unsafe impl Sync for ControlMapping {}

impl Drop for ControlMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, CONTROL_PAGE_SIZE);
        }
    }
}

/// One named, shared-memory-backed ring, plus enough bookkeeping to unlink
/// it on drop.
pub struct ShmRing {
    pub ring: Ring<SharedWaiter>,
    _control: ControlMapping,
    fd: RawFd,
    name: String,
}

impl ShmRing {
    /// Create or open the named ring. `capacity` is ignored (and must
    /// match what the creator used) when `role == Role::Open`.
    pub fn new(name: &str, capacity: usize, max_message_size: usize, role: Role) -> Result<Self, ShmError> {
        let total = CONTROL_PAGE_SIZE + capacity;
        let fd = open_shm(name, total, role)?;

        // SAFETY: fd is sized to at least CONTROL_PAGE_SIZE bytes.
        let control_ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                CONTROL_PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if control_ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Io {
                name: name.to_string(),
                source: err,
            });
        }
        let control = control_ptr as *mut ControlLayout;

        if role == Role::Create {
            unsafe {
                std::ptr::write(
                    std::ptr::addr_of_mut!((*control).header),
                    RingHeader::new(capacity, max_message_size),
                );
                RawConditionPair::init_in_place(std::ptr::addr_of_mut!((*control).conditions));
            }
        }

        let mirror = MirrorMap::new_at(fd, CONTROL_PAGE_SIZE as i64, capacity)?;

        // SAFETY: `waiter` points at the RawConditionPair embedded in the
        // control page, which outlives the Ring via `_control` below.
        let waiter = unsafe { SharedWaiter::new(std::ptr::addr_of!((*control).conditions)) };
        let header = unsafe {
            NonNull::new(std::ptr::addr_of_mut!((*control).header)).expect("non-null control mapping")
        };
        // SAFETY: header and mirror both point at memory kept alive by
        // `_control`/the mirror mapping itself, for the Ring's lifetime.
        let ring = unsafe { Ring::from_parts(header, mirror, waiter) };

        Ok(ShmRing {
            ring,
            _control: ControlMapping { ptr: control_ptr as *mut u8 },
            fd,
            name: name.to_string(),
        })
    }
}

impl Drop for ShmRing {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
        unlink_shm(&self.name);
    }
}

fn open_shm(name: &str, total_size: usize, role: Role) -> Result<RawFd, ShmError> {
    let cname = CString::new(name).expect("shm name has no interior NUL");
    let flags = match role {
        Role::Create => libc::O_CREAT | libc::O_RDWR,
        Role::Open => libc::O_RDWR,
    };
    let fd = unsafe { libc::shm_open(cname.as_ptr(), flags, 0o600) };
    if fd < 0 {
        return Err(ShmError::Io {
            name: name.to_string(),
            source: std::io::Error::last_os_error(),
        });
    }
    if role == Role::Create {
        // SAFETY: fd just created above.
        let rc = unsafe { libc::ftruncate(fd, total_size as libc::off_t) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Io {
                name: name.to_string(),
                source: err,
            });
        }
    }
    Ok(fd)
}

pub fn unlink_shm(name: &str) {
    if let Ok(cname) = CString::new(name) {
        // Idempotent: ENOENT from a peer racing us to unlink is expected.
        unsafe {
            libc::shm_unlink(cname.as_ptr());
        }
    }
}
