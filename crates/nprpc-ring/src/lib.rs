//! Single-producer single-consumer, byte-granular ring buffer with
//! mirror-mapped wraparound.
//!
//! Each message is framed as `[u32 little-endian size][payload bytes]`.
//! The ring's backing memory is mapped twice, back to back, so that any
//! offset `o` with length `L <= capacity` is contiguous in the caller's
//! address space regardless of whether it straddles the physical
//! wraparound point — readers never see a split message.
//!
//! The ring itself only touches two atomics (`write_idx`, `read_idx`) on
//! the fast path. A [`RingWaiter`] is used purely to let an idle reader (or
//! a writer stalled on a full ring) sleep instead of spinning; it is never
//! touched while reserving, committing, or reading a message.

mod error;
mod mirror;
mod waiter;

pub use error::RingError;
pub use mirror::{anonymous_fd, MirrorMap};
pub use waiter::{LocalWaiter, RingWaiter};

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default total ring window, per direction (spec.md section 4.B).
pub const DEFAULT_RING_CAPACITY: usize = 16 * 1024 * 1024;
/// Default max single message size (spec.md section 4.B).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

const FRAME_PREFIX_LEN: u64 = 4;

/// Fixed-layout header shared between the two ends of a ring. For an
/// in-process ring this lives in a normal heap allocation owned by the
/// `Ring`; for a shared-memory ring (see `nprpc-shm`) it lives inside the
/// mapped segment so both processes observe the same atomics.
#[repr(C)]
pub struct RingHeader {
    pub buffer_size: u64,
    pub max_message_size: u64,
    pub write_idx: AtomicU64,
    pub read_idx: AtomicU64,
}

impl RingHeader {
    pub fn new(buffer_size: usize, max_message_size: usize) -> Self {
        RingHeader {
            buffer_size: buffer_size as u64,
            max_message_size: max_message_size as u64,
            write_idx: AtomicU64::new(0),
            read_idx: AtomicU64::new(0),
        }
    }
}

/// A reserved, not-yet-committed write slot.
pub struct WriteReservation<'a> {
    payload: &'a mut [u8],
    start_idx: u64,
}

impl<'a> WriteReservation<'a> {
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.payload
    }

    pub fn max_size(&self) -> usize {
        self.payload.len()
    }
}

/// A committed, not-yet-consumed payload. The `u32` size prefix is hidden;
/// `bytes()` exposes only the payload.
pub struct ReadView<'a> {
    payload: &'a [u8],
    frame_len: u64,
}

impl<'a> ReadView<'a> {
    pub fn bytes(&self) -> &[u8] {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A lock-free SPSC ring over mirror-mapped memory, parameterized over the
/// sleep/wake mechanism used when the ring is empty or full.
pub struct Ring<W: RingWaiter> {
    header: NonNull<RingHeader>,
    /// Keeps a heap-allocated header alive when the ring isn't backed by
    /// externally-owned shared memory. `None` when `header` points into
    /// memory owned by the caller (e.g. a shared-memory segment).
    _owned_header: Option<Box<RingHeader>>,
    mirror: MirrorMap,
    waiter: W,
}

// SAFETY: `header` either points at heap memory we own (`_owned_header`) or
// at memory the caller guarantees outlives this `Ring` and is valid for
// concurrent access from multiple threads/processes (shared-memory case).
unsafe impl<W: RingWaiter> Send for Ring<W> {}
unsafe impl<W: RingWaiter> Sync for Ring<W> {}

impl Ring<LocalWaiter> {
    /// A ring usable only within the current process (and across threads
    /// within it) — the in-process transport and unit tests.
    pub fn new_in_process(
        capacity: usize,
        max_message_size: usize,
    ) -> Result<Self, RingError> {
        let fd = mirror::anonymous_fd(capacity)?;
        let mirror = MirrorMap::new(fd, capacity)?;
        // SAFETY: fd has served its purpose once mapped; the mapping keeps
        // the underlying shm object alive.
        unsafe { libc::close(fd) };

        let header = Box::new(RingHeader::new(capacity, max_message_size));
        let header_ptr = NonNull::from(header.as_ref());

        Ok(Ring {
            header: header_ptr,
            _owned_header: Some(header),
            mirror,
            waiter: LocalWaiter::new(),
        })
    }
}

impl<W: RingWaiter> Ring<W> {
    /// Build a ring over an already-constructed mirror mapping and header,
    /// e.g. one carved out of a shared-memory channel segment. `header`
    /// must remain valid and stable for the lifetime of the returned
    /// `Ring` — callers (such as `nprpc-shm`) keep the backing mapping
    /// alive themselves.
    ///
    /// # Safety
    /// `header` must point at a valid, appropriately-sized `RingHeader`
    /// that outlives the returned `Ring`.
    pub unsafe fn from_parts(header: NonNull<RingHeader>, mirror: MirrorMap, waiter: W) -> Self {
        Ring {
            header,
            _owned_header: None,
            mirror,
            waiter,
        }
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: invariant maintained by construction (`new_in_process` or
        // `from_parts`'s documented contract).
        unsafe { self.header.as_ref() }
    }

    pub fn capacity(&self) -> usize {
        self.mirror.capacity()
    }

    pub fn max_message_size(&self) -> usize {
        self.header().max_message_size as usize
    }

    /// Reserve space for a message of up to `min_size` payload bytes.
    /// Returns `None` if the ring doesn't currently have room; the caller
    /// should retry after `wait_for_space`.
    pub fn try_reserve_write(
        &self,
        min_size: usize,
    ) -> Result<Option<WriteReservation<'_>>, RingError> {
        let max = self.max_message_size();
        if min_size > max {
            return Err(RingError::MessageTooLarge {
                requested: min_size,
                max,
            });
        }

        let header = self.header();
        let read_idx = header.read_idx.load(Ordering::Acquire);
        let write_idx = header.write_idx.load(Ordering::Relaxed);
        let used = write_idx - read_idx;
        let needed = FRAME_PREFIX_LEN + min_size as u64;
        if used + needed > self.capacity() as u64 {
            return Ok(None);
        }

        let payload_offset = write_idx + FRAME_PREFIX_LEN;
        // SAFETY: min_size <= max_message_size <= capacity, offset wraps
        // within the mirrored window.
        let payload = unsafe { self.mirror.slice_mut(payload_offset, min_size) };
        Ok(Some(WriteReservation {
            payload,
            start_idx: write_idx,
        }))
    }

    /// Publish `actual_size` bytes of `reservation` as a complete message.
    pub fn commit_write(&self, reservation: WriteReservation<'_>, actual_size: usize) {
        assert!(
            actual_size <= reservation.payload.len(),
            "commit_write({actual_size}) exceeds reservation of {}",
            reservation.payload.len()
        );
        // SAFETY: start_idx..start_idx+4 was implicitly reserved by
        // try_reserve_write (it computed the payload offset 4 bytes past it).
        let prefix = unsafe { self.mirror.slice_mut(reservation.start_idx, 4) };
        prefix.copy_from_slice(&(actual_size as u32).to_le_bytes());

        let frame_len = FRAME_PREFIX_LEN + actual_size as u64;
        self.header().write_idx.fetch_add(frame_len, Ordering::Release);
        self.waiter.notify_data();
    }

    /// Peek at the next unread message without consuming it. Returns
    /// `None` if the ring is empty.
    pub fn try_read_view(&self) -> Option<ReadView<'_>> {
        let header = self.header();
        let write_idx = header.write_idx.load(Ordering::Acquire);
        let read_idx = header.read_idx.load(Ordering::Relaxed);
        if read_idx == write_idx {
            return None;
        }
        // SAFETY: a fully-committed frame of `4 + size` bytes exists at
        // read_idx, published with Release by commit_write and observed
        // here with Acquire on write_idx.
        let prefix = unsafe { self.mirror.slice(read_idx, 4) };
        let size = u32::from_le_bytes(prefix.try_into().expect("4-byte slice")) as usize;
        let payload = unsafe { self.mirror.slice(read_idx + FRAME_PREFIX_LEN, size) };
        Some(ReadView {
            payload,
            frame_len: FRAME_PREFIX_LEN + size as u64,
        })
    }

    /// Discard the message returned by `try_read_view`, making its space
    /// available to the writer.
    pub fn commit_read(&self, view: ReadView<'_>) {
        self.header().read_idx.fetch_add(view.frame_len, Ordering::Release);
        self.waiter.notify_space();
    }

    pub fn wait_for_data(&self, timeout: Duration) {
        self.waiter.wait_for_data(timeout);
    }

    pub fn wait_for_space(&self, timeout: Duration) {
        self.waiter.wait_for_space(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_ring() -> Ring<LocalWaiter> {
        // Must be a multiple of the page size for the double mmap trick.
        let page = 4096;
        Ring::new_in_process(page, page).unwrap()
    }

    #[test]
    fn round_trip_sequence_of_messages() {
        let ring = small_ring();
        let messages: &[&[u8]] = &[b"alpha", b"beta", b"gamma-delta", b""];

        for m in messages {
            let mut res = ring.try_reserve_write(m.len()).unwrap().unwrap();
            res.bytes_mut()[..m.len()].copy_from_slice(m);
            ring.commit_write(res, m.len());
        }

        for m in messages {
            let view = ring.try_read_view().unwrap();
            assert_eq!(view.bytes(), *m);
            ring.commit_read(view);
        }
        assert!(ring.try_read_view().is_none());
    }

    #[test]
    fn empty_ring_read_returns_none() {
        let ring = small_ring();
        assert!(ring.try_read_view().is_none());
    }

    #[test]
    fn full_ring_reserve_returns_none() {
        let ring = Ring::new_in_process(4096, 4096).unwrap();
        let payload = vec![0xABu8; 4096 - 4];
        let mut res = ring.try_reserve_write(payload.len()).unwrap().unwrap();
        res.bytes_mut().copy_from_slice(&payload);
        ring.commit_write(res, payload.len());

        // No room left for even a zero-length message (4-byte prefix needed).
        assert!(ring.try_reserve_write(0).unwrap().is_none());
    }

    #[test]
    fn message_larger_than_max_is_rejected() {
        let ring = Ring::new_in_process(4096, 64).unwrap();
        assert!(matches!(
            ring.try_reserve_write(128),
            Err(RingError::MessageTooLarge { requested: 128, max: 64 })
        ));
    }

    #[test]
    fn wraparound_message_is_contiguous() {
        // Push messages until write_idx sits close to the capacity boundary,
        // then write one that straddles it, and verify byte-for-byte
        // contiguity of the read view.
        let capacity = 4096usize;
        let ring = Ring::new_in_process(capacity, capacity).unwrap();

        // Fill and drain repeatedly to advance write_idx/read_idx near the
        // wrap point without leaving unread data behind.
        let filler = vec![0x11u8; 100];
        for _ in 0..30 {
            let mut res = ring.try_reserve_write(filler.len()).unwrap().unwrap();
            res.bytes_mut().copy_from_slice(&filler);
            ring.commit_write(res, filler.len());
            let view = ring.try_read_view().unwrap();
            assert_eq!(view.bytes(), &filler[..]);
            ring.commit_read(view);
        }

        // Now write a message whose payload straddles the capacity boundary.
        let straddle: Vec<u8> = (0u8..200).collect();
        let mut res = ring.try_reserve_write(straddle.len()).unwrap().unwrap();
        res.bytes_mut().copy_from_slice(&straddle);
        ring.commit_write(res, straddle.len());

        let view = ring.try_read_view().unwrap();
        assert_eq!(view.bytes(), &straddle[..]);
        ring.commit_read(view);
    }
}
