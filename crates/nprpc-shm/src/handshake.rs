//! The payload a client deposits on a server's well-known listener ring to
//! request a dedicated channel, and the one-page "server ready" flag region
//! the client hands the server a name for.

use crate::ShmError;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const HANDSHAKE_MAGIC: u32 = 0x4e50_5250; // b"NPRP"
pub const HANDSHAKE_VERSION: u32 = 1;
const READY_FLAG_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub magic: u32,
    pub version: u32,
    pub channel_uuid: Uuid,
    pub ready_flag_name: String,
}

impl HandshakeMessage {
    pub const WIRE_LEN: usize = 4 + 4 + 16 + READY_FLAG_NAME_LEN;

    pub fn new(channel_uuid: Uuid, ready_flag_name: &str) -> Self {
        HandshakeMessage {
            magic: HANDSHAKE_MAGIC,
            version: HANDSHAKE_VERSION,
            channel_uuid,
            ready_flag_name: ready_flag_name.to_string(),
        }
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..24].copy_from_slice(self.channel_uuid.as_bytes());
        let name_bytes = self.ready_flag_name.as_bytes();
        assert!(
            name_bytes.len() < READY_FLAG_NAME_LEN,
            "ready flag name too long for handshake wire format"
        );
        buf[24..24 + name_bytes.len()].copy_from_slice(name_bytes);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ShmError> {
        if bytes.len() != Self::WIRE_LEN {
            return Err(ShmError::HandshakeMismatch);
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if magic != HANDSHAKE_MAGIC || version != HANDSHAKE_VERSION {
            return Err(ShmError::HandshakeMismatch);
        }
        let channel_uuid = Uuid::from_bytes(bytes[8..24].try_into().unwrap());
        let name_region = &bytes[24..24 + READY_FLAG_NAME_LEN];
        let nul = name_region.iter().position(|&b| b == 0).unwrap_or(name_region.len());
        let ready_flag_name = String::from_utf8_lossy(&name_region[..nul]).into_owned();
        Ok(HandshakeMessage {
            magic,
            version,
            channel_uuid,
            ready_flag_name,
        })
    }
}

/// A one-page shared-memory region holding a single atomic "server is
/// ready" flag. The client creates it before depositing a handshake; the
/// server sets it once the dedicated channel exists.
pub struct ReadyFlag {
    ptr: *mut AtomicU32,
    fd: RawFd,
    name: String,
    owner: bool,
}

const READY_FLAG_PAGE: usize = 4096;

// SAFETY: ptr addresses a shared memory mapping.
unsafe impl Send for ReadyFlag {}
unsafe impl Sync for ReadyFlag {}

impl ReadyFlag {
    pub fn create(name: &str) -> Result<Self, ShmError> {
        Self::open_impl(name, true)
    }

    pub fn open(name: &str) -> Result<Self, ShmError> {
        Self::open_impl(name, false)
    }

    fn open_impl(name: &str, create: bool) -> Result<Self, ShmError> {
        let cname = std::ffi::CString::new(name).expect("ready flag name has no interior NUL");
        let flags = if create {
            libc::O_CREAT | libc::O_RDWR
        } else {
            libc::O_RDWR
        };
        let fd = unsafe { libc::shm_open(cname.as_ptr(), flags, 0o600) };
        if fd < 0 {
            return Err(ShmError::Io {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        if create && unsafe { libc::ftruncate(fd, READY_FLAG_PAGE as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Io {
                name: name.to_string(),
                source: err,
            });
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                READY_FLAG_PAGE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Io {
                name: name.to_string(),
                source: err,
            });
        }
        Ok(ReadyFlag {
            ptr: ptr as *mut AtomicU32,
            fd,
            name: name.to_string(),
            owner: create,
        })
    }

    fn atomic(&self) -> &AtomicU32 {
        unsafe { &*self.ptr }
    }

    pub fn set_ready(&self) {
        self.atomic().store(1, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.atomic().load(Ordering::Acquire) == 1
    }

    /// Poll until ready or `timeout` elapses. The handshake path is rare
    /// and latency-insensitive compared to the ring fast path, so a short
    /// poll loop is acceptable here (unlike the ring itself).
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), ShmError> {
        let deadline = Instant::now() + timeout;
        while !self.is_ready() {
            if Instant::now() >= deadline {
                return Err(ShmError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

impl Drop for ReadyFlag {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, READY_FLAG_PAGE);
            libc::close(self.fd);
        }
        if self.owner {
            crate::segment::unlink_shm(&self.name);
        }
    }
}
