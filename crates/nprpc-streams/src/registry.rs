//! Per-session stream registry: one [`StreamManager`] owns every stream a
//! session currently has open, in either direction. Grounded on the
//! connection-registry pattern from a WebTransport stream manager in the
//! retrieved corpus (`DashMap`-keyed entries, `mpsc` command channels,
//! `oneshot` replies) adapted to NPRPC's push-based chunk/complete/error
//! wire messages instead of that example's request/response commands.

use crate::error::StreamError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// Default number of in-flight chunks a writer may have unacknowledged
/// before `send_chunk` suspends waiting for a window update.
pub const DEFAULT_WINDOW: u32 = 16;

/// Chunks arriving more than this many sequence numbers ahead of the next
/// expected one on an unreliable stream are dropped rather than buffered.
/// `Config`-tunable; spec.md only says "small reorder window" without
/// pinning a number.
pub const REORDER_WINDOW: u64 = 32;

/// Per-stream inactivity timeout: no chunk, completion, or window update
/// for this long fails the stream with [`StreamError::Timeout`].
pub const STREAM_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a stream carries client-to-server, server-to-client, or both
/// directions of traffic. Resolves SPEC_FULL.md's open question on how a
/// stream declares its shape at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    ServerStream = 0,
    ClientStream = 1,
    Bidi = 2,
}

impl StreamKind {
    pub fn from_byte(byte: u8) -> Result<Self, StreamError> {
        match byte {
            0 => Ok(StreamKind::ServerStream),
            1 => Ok(StreamKind::ClientStream),
            2 => Ok(StreamKind::Bidi),
            _ => Err(StreamError::WriteFailed(format!("unknown stream kind byte {byte}"))),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Event delivered to a stream's registered reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(Vec<u8>),
    Completed,
    Failed(StreamError),
    Cancelled,
}

/// Transport-side hook a [`StreamManager`] calls to push outbound frames.
/// Transport drivers in `nprpc-transport` implement this over whatever
/// wire framing they use (a main-stream multiplexed frame, a native QUIC
/// stream, or a datagram).
#[async_trait]
pub trait StreamWriter: Send + Sync {
    async fn write_chunk(&self, seq: u64, bytes: Vec<u8>) -> Result<(), StreamError>;
    async fn write_complete(&self, final_seq: u64) -> Result<(), StreamError>;
    async fn write_error(&self, error: &StreamError) -> Result<(), StreamError>;
    async fn write_cancel(&self) -> Result<(), StreamError>;
}

struct WriterEntry {
    writer: Arc<dyn StreamWriter>,
    unreliable: bool,
    next_seq: AtomicU64,
    in_flight: AtomicU64,
    window: AtomicU64,
    capacity: Notify,
    last_activity: parking_lot::Mutex<Instant>,
}

struct ReaderEntry {
    tx: mpsc::UnboundedSender<StreamEvent>,
    reliable: bool,
    next_expected: parking_lot::Mutex<u64>,
    reorder_buffer: parking_lot::Mutex<BTreeMap<u64, Vec<u8>>>,
    last_activity: parking_lot::Mutex<Instant>,
}

/// Registry of every stream a single session currently has open, keyed by
/// the stream id carried in each `StreamInit`/`StreamDataChunk` header.
/// One instance lives per `Session`; closing the session drains it.
pub struct StreamManager {
    writers: DashMap<u64, WriterEntry>,
    readers: DashMap<u64, ReaderEntry>,
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamManager {
    pub fn new() -> Self {
        StreamManager {
            writers: DashMap::new(),
            readers: DashMap::new(),
        }
    }

    /// Register the write side of a stream this session is producing.
    pub fn register_stream(&self, id: u64, writer: Arc<dyn StreamWriter>, unreliable: bool) {
        self.writers.insert(
            id,
            WriterEntry {
                writer,
                unreliable,
                next_seq: AtomicU64::new(0),
                in_flight: AtomicU64::new(0),
                window: AtomicU64::new(DEFAULT_WINDOW as u64),
                capacity: Notify::new(),
                last_activity: parking_lot::Mutex::new(Instant::now()),
            },
        );
    }

    /// Register the read side of a stream this session is consuming.
    /// Returns the receiving half; the manager keeps the sender and feeds
    /// it from inbound dispatch.
    pub fn register_reader(&self, id: u64, reliable: bool) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.readers.insert(
            id,
            ReaderEntry {
                tx,
                reliable,
                next_expected: parking_lot::Mutex::new(0),
                reorder_buffer: parking_lot::Mutex::new(BTreeMap::new()),
                last_activity: parking_lot::Mutex::new(Instant::now()),
            },
        );
        rx
    }

    pub fn has_reader(&self, id: u64) -> bool {
        self.readers.contains_key(&id)
    }

    pub fn has_writer(&self, id: u64) -> bool {
        self.writers.contains_key(&id)
    }

    // ---- Outbound -------------------------------------------------

    /// Waits for window capacity, then writes a chunk and advances the
    /// writer's sequence counter.
    pub async fn send_chunk(&self, id: u64, bytes: Vec<u8>) -> Result<(), StreamError> {
        loop {
            let writer = self.writers.get(&id).ok_or(StreamError::UnknownStream(id))?;
            let window = writer.window.load(Ordering::Acquire);
            let in_flight = writer.in_flight.load(Ordering::Acquire);
            if in_flight < window {
                let seq = writer.next_seq.fetch_add(1, Ordering::AcqRel);
                writer.in_flight.fetch_add(1, Ordering::AcqRel);
                *writer.last_activity.lock() = Instant::now();
                let w = writer.writer.clone();
                drop(writer);
                return w.write_chunk(seq, bytes).await;
            }
            let notified = writer.capacity.notified();
            drop(writer);
            notified.await;
        }
    }

    pub async fn send_complete(&self, id: u64) -> Result<(), StreamError> {
        let (writer, final_seq) = {
            let entry = self.writers.get(&id).ok_or(StreamError::UnknownStream(id))?;
            (entry.writer.clone(), entry.next_seq.load(Ordering::Acquire))
        };
        self.writers.remove(&id);
        writer.write_complete(final_seq).await
    }

    pub async fn send_error(&self, id: u64, error: StreamError) -> Result<(), StreamError> {
        let writer = self.writers.remove(&id).map(|(_, entry)| entry.writer);
        match writer {
            Some(w) => w.write_error(&error).await,
            None => Err(StreamError::UnknownStream(id)),
        }
    }

    /// Either side may cancel. Cancelling a stream we're writing notifies
    /// the transport and removes the writer entry; cancelling one we're
    /// reading delivers `Cancelled` to the reader and removes it.
    pub async fn send_cancel(&self, id: u64) -> Result<(), StreamError> {
        if let Some((_, entry)) = self.writers.remove(&id) {
            return entry.writer.write_cancel().await;
        }
        if let Some((_, entry)) = self.readers.remove(&id) {
            let _ = entry.tx.send(StreamEvent::Cancelled);
            return Ok(());
        }
        Err(StreamError::UnknownStream(id))
    }

    /// Informs the writer side that the reader has consumed `count`
    /// chunks, freeing that much window capacity.
    pub fn window_update(&self, id: u64, count: u32) {
        if let Some(entry) = self.writers.get(&id) {
            entry.in_flight.fetch_sub(count as u64, Ordering::AcqRel);
            entry.capacity.notify_waiters();
        }
    }

    // ---- Inbound dispatch ------------------------------------------

    /// Deliver an inbound data chunk to its registered reader. Reliable
    /// streams reject (and fail) any chunk out of strict sequence order;
    /// unreliable streams tolerate reordering within [`REORDER_WINDOW`]
    /// and silently drop anything older or further ahead.
    pub fn on_data_chunk(&self, id: u64, seq: u64, bytes: Vec<u8>) -> Result<(), StreamError> {
        let entry = self.readers.get(&id).ok_or(StreamError::UnknownStream(id))?;
        *entry.last_activity.lock() = Instant::now();

        if entry.reliable {
            let mut next_expected = entry.next_expected.lock();
            if seq != *next_expected {
                return Err(StreamError::ReorderWindowExceeded(id));
            }
            *next_expected += 1;
            drop(next_expected);
            let _ = entry.tx.send(StreamEvent::Chunk(bytes));
            return Ok(());
        }

        let mut next_expected = entry.next_expected.lock();
        if seq < *next_expected {
            return Ok(()); // duplicate / stale, drop silently
        }
        if seq == *next_expected {
            *next_expected += 1;
            let _ = entry.tx.send(StreamEvent::Chunk(bytes));
            let mut buffer = entry.reorder_buffer.lock();
            while let Some(next) = buffer.remove(&*next_expected) {
                let _ = entry.tx.send(StreamEvent::Chunk(next));
                *next_expected += 1;
            }
            return Ok(());
        }
        if seq - *next_expected > REORDER_WINDOW {
            return Ok(()); // gap too large, drop rather than stall
        }
        entry.reorder_buffer.lock().insert(seq, bytes);
        Ok(())
    }

    pub fn on_completion(&self, id: u64) -> Result<(), StreamError> {
        let (_, entry) = self.readers.remove(&id).ok_or(StreamError::UnknownStream(id))?;
        let _ = entry.tx.send(StreamEvent::Completed);
        Ok(())
    }

    pub fn on_error(&self, id: u64, error: StreamError) -> Result<(), StreamError> {
        let (_, entry) = self.readers.remove(&id).ok_or(StreamError::UnknownStream(id))?;
        let _ = entry.tx.send(StreamEvent::Failed(error));
        Ok(())
    }

    /// Peer cancelled a stream we're reading. Writer-side cancellation
    /// from the peer is modeled the same way `on_error` is: the stream
    /// this process was writing to is torn down locally.
    pub fn on_cancellation(&self, id: u64) -> Result<(), StreamError> {
        if let Some((_, entry)) = self.readers.remove(&id) {
            let _ = entry.tx.send(StreamEvent::Cancelled);
            return Ok(());
        }
        self.writers.remove(&id).map(|_| ()).ok_or(StreamError::UnknownStream(id))
    }

    /// Fails every open stream with `SessionClosed`, draining both maps.
    /// Called once from the owning session's close path.
    pub fn cancel_all(&self) {
        let ids: Vec<u64> = self.readers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.readers.remove(&id) {
                let _ = entry.tx.send(StreamEvent::Failed(StreamError::SessionClosed));
            }
        }
        self.writers.clear();
    }

    /// Sweeps for streams idle longer than [`STREAM_INACTIVITY_TIMEOUT`],
    /// failing readers with `Timeout` and dropping stale writers. Intended
    /// to be driven by a periodic task on the owning session.
    pub fn reap_idle(&self) {
        let stale_readers: Vec<u64> = self
            .readers
            .iter()
            .filter(|entry| entry.last_activity.lock().elapsed() > STREAM_INACTIVITY_TIMEOUT)
            .map(|entry| *entry.key())
            .collect();
        for id in stale_readers {
            if let Some((_, entry)) = self.readers.remove(&id) {
                let _ = entry.tx.send(StreamEvent::Failed(StreamError::Timeout(id)));
            }
        }
        self.writers.retain(|_, entry| entry.last_activity.lock().elapsed() <= STREAM_INACTIVITY_TIMEOUT);
    }
}

/// Spawns the periodic [`StreamManager::reap_idle`] sweep every transport
/// driver's session needs, without requiring the driver to hold or abort
/// another `JoinHandle` itself: the task holds only a [`std::sync::Weak`]
/// reference to `streams` and exits on its own once the session (and its
/// last strong reference) is dropped.
pub fn spawn_idle_reaper(streams: &Arc<StreamManager>) -> tokio::task::JoinHandle<()> {
    let weak = Arc::downgrade(streams);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(STREAM_INACTIVITY_TIMEOUT);
        tick.tick().await;
        loop {
            tick.tick().await;
            let Some(streams) = weak.upgrade() else { break };
            streams.reap_idle();
        }
    })
}
