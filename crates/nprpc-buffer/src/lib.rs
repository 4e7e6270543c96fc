//! Length-tracked, append/consume byte buffer with an optional zero-copy
//! "view" mode over foreign memory.
//!
//! A [`FlatBuffer`] is the unit every transport driver reads requests from
//! and writes replies into. In heap mode it behaves like a growable byte
//! vector with a consume-from-front cursor. In view mode it is backed by a
//! caller-supplied region (typically a reservation inside a shared-memory
//! ring) and `prepare` cannot grow past that reservation without either
//! demoting to a heap buffer or failing, depending on the caller's choice.

mod error;
mod view;

pub use error::BufferError;
pub use view::CommitHook;

use tracing::trace;

/// How a [`FlatBuffer`] should react when `prepare` would overflow a view
/// reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Flush the committed prefix via the commit hook, then switch to a
    /// freshly allocated heap buffer, copying the committed bytes across.
    DemoteToHeap,
    /// Fail with [`BufferError::Overflow`] instead of demoting. Used during
    /// zero-copy sends, where silently falling back to a heap copy would
    /// defeat the purpose of the view.
    Strict,
}

enum Storage {
    Heap(Vec<u8>),
    View(view::ViewBuffer),
}

/// An append-only write region plus a consume-from-front read region.
pub struct FlatBuffer {
    storage: Storage,
    /// Number of committed bytes, counted from the front of the write
    /// region (i.e. after accounting for already-consumed bytes).
    size: usize,
    /// Bytes discarded from the front so far; only meaningful for heap
    /// storage, where we don't physically shift memory on every consume.
    consumed: usize,
    /// Size most recently returned by `prepare`, used to bound `commit`.
    reserved: usize,
}

impl Default for FlatBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatBuffer {
    /// A new, empty heap-backed buffer.
    pub fn new() -> Self {
        FlatBuffer {
            storage: Storage::Heap(Vec::new()),
            size: 0,
            consumed: 0,
            reserved: 0,
        }
    }

    /// A new heap-backed buffer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        FlatBuffer {
            storage: Storage::Heap(Vec::with_capacity(capacity)),
            size: 0,
            consumed: 0,
            reserved: 0,
        }
    }

    /// Construct a buffer that writes into `capacity` bytes of foreign
    /// memory starting at `ptr + initial_offset`. `commit_hook` is invoked
    /// with the number of bytes written so far immediately before a
    /// `DemoteToHeap` overflow copies them into a heap buffer.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes for `initial_offset + capacity`
    /// bytes for the lifetime of this `FlatBuffer`, and must not be aliased
    /// by any other live reference.
    pub unsafe fn view(
        ptr: *mut u8,
        initial_offset: usize,
        capacity: usize,
        policy: OverflowPolicy,
        commit_hook: CommitHook,
    ) -> Self {
        FlatBuffer {
            storage: Storage::View(unsafe {
                view::ViewBuffer::new(ptr, initial_offset, capacity, policy, commit_hook)
            }),
            size: 0,
            consumed: 0,
            reserved: 0,
        }
    }

    /// Reserve `n` writable bytes and return a mutable slice over them.
    /// The slice is valid until the next `prepare` call. Does not advance
    /// `size` — call `commit` to do that.
    pub fn prepare(&mut self, n: usize) -> Result<&mut [u8], BufferError> {
        if let Storage::View(view) = &self.storage {
            if !view.fits(self.size, n) {
                match view.policy() {
                    OverflowPolicy::Strict => {
                        return Err(BufferError::Overflow {
                            requested: n,
                            available: view.capacity().saturating_sub(self.size),
                        });
                    }
                    OverflowPolicy::DemoteToHeap => {
                        if let Storage::View(view) = &mut self.storage {
                            (view.commit_hook().clone())(self.size);
                            let mut heap = Vec::with_capacity(self.size + n);
                            heap.extend_from_slice(view.cdata(self.size));
                            self.storage = Storage::Heap(heap);
                        }
                        trace!(size = self.size, "flat_buffer demoted view to heap");
                    }
                }
            }
        }

        match &mut self.storage {
            Storage::Heap(buf) => {
                let end = self.consumed + self.size + n;
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                self.reserved = n;
                Ok(&mut buf[self.consumed + self.size..end])
            }
            Storage::View(view) => {
                let slice = view
                    .try_prepare(self.size, n)
                    .expect("fits() was checked above");
                self.reserved = n;
                Ok(slice)
            }
        }
    }

    /// Advance the committed size by `k` bytes, which must be `<=` the most
    /// recent `prepare` reservation.
    pub fn commit(&mut self, k: usize) {
        assert!(
            k <= self.reserved,
            "commit({k}) exceeds last prepare reservation ({})",
            self.reserved
        );
        self.size += k;
        self.reserved -= k;
        trace!(committed = k, total = self.size, "flat_buffer commit");
    }

    /// Discard `n` bytes from the front of the committed region.
    pub fn consume(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.size {
            return Err(BufferError::ShortRead {
                requested: n,
                available: self.size,
            });
        }
        match &mut self.storage {
            Storage::Heap(_) => {
                self.consumed += n;
            }
            Storage::View(view) => view.consume(n),
        }
        self.size -= n;
        Ok(())
    }

    /// Append `bytes` in one shot: `prepare(bytes.len())` + copy + `commit`.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let dst = self.prepare(bytes.len())?;
        dst.copy_from_slice(bytes);
        self.commit(bytes.len());
        Ok(())
    }

    /// Mutable view over the committed bytes.
    pub fn data(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Heap(buf) => &mut buf[self.consumed..self.consumed + self.size],
            Storage::View(view) => view.data(self.size),
        }
    }

    /// Read-only view over the committed bytes.
    pub fn cdata(&self) -> &[u8] {
        match &self.storage {
            Storage::Heap(buf) => &buf[self.consumed..self.consumed + self.size],
            Storage::View(view) => view.cdata(self.size),
        }
    }

    /// Number of committed, not-yet-consumed bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Reset to an empty heap buffer (used by `make_simple_answer`-style
    /// reply construction, which always starts a tx buffer from scratch).
    pub fn reset(&mut self) {
        self.storage = Storage::Heap(Vec::new());
        self.size = 0;
        self.consumed = 0;
        self.reserved = 0;
    }

    /// True when this buffer is backed by foreign memory rather than the
    /// heap (used by callers deciding whether a send can skip a copy).
    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_commit_consume_tracks_size() {
        let mut buf = FlatBuffer::new();
        assert_eq!(buf.size(), 0);

        buf.append(b"hello").unwrap();
        assert_eq!(buf.size(), 5);
        assert_eq!(buf.cdata(), b"hello");

        buf.consume(2).unwrap();
        assert_eq!(buf.size(), 3);
        assert_eq!(buf.cdata(), b"llo");

        buf.append(b"!!").unwrap();
        assert_eq!(buf.size(), 5);
        assert_eq!(buf.cdata(), b"llo!!");
    }

    #[test]
    fn scripted_sequence_matches_invariant() {
        // sum(commits) - sum(consumes) == size() after every step.
        let mut buf = FlatBuffer::new();
        let mut expected: i64 = 0;

        let script: &[(usize, usize, usize)] = &[
            // (prepare_n, commit_k, consume_c)
            (10, 10, 0),
            (5, 3, 4),
            (8, 8, 2),
            (0, 0, 0),
            (20, 1, 5),
        ];

        for &(p, c, x) in script {
            if p > 0 {
                buf.prepare(p).unwrap();
            }
            buf.commit(c);
            expected += c as i64;
            if x > 0 {
                buf.consume(x).unwrap();
                expected -= x as i64;
            }
            assert_eq!(buf.size() as i64, expected);
        }
    }

    #[test]
    fn consume_past_committed_len_errors() {
        let mut buf = FlatBuffer::new();
        buf.append(b"ab").unwrap();
        assert!(matches!(
            buf.consume(3),
            Err(BufferError::ShortRead {
                requested: 3,
                available: 2
            })
        ));
    }

    #[test]
    #[should_panic(expected = "exceeds last prepare reservation")]
    fn commit_more_than_reserved_panics() {
        let mut buf = FlatBuffer::new();
        buf.prepare(4).unwrap();
        buf.commit(5);
    }

    #[test]
    fn consume_prefix_equivalence() {
        // After consume(n), data()[0..] equals pre-consume data()[n..].
        let mut buf = FlatBuffer::new();
        buf.append(b"0123456789").unwrap();
        let before: Vec<u8> = buf.cdata().to_vec();
        buf.consume(4).unwrap();
        assert_eq!(buf.cdata(), &before[4..]);
    }
}
