//! The session abstraction every transport driver implements, plus the
//! reusable request-id correlation table, outbound FIFO queue, and
//! timeout/inactivity bookkeeping shared by all of them.

use crate::error::CoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Invoked exactly once with the reply (or the failure that stood in for
/// one) when an asynchronous call completes.
pub type Completion = Box<dyn FnOnce(Result<Vec<u8>, CoreError>) + Send>;

/// Transport-agnostic send/receive contract. Each transport driver
/// (`nprpc-transport`) provides one implementation per protocol; all of
/// them delegate bookkeeping to an embedded [`SessionCore`].
#[async_trait]
pub trait Session: Send + Sync {
    /// Write `buffer` and block until a reply with the matching request id
    /// arrives, or `timeout` elapses.
    async fn send_receive(&self, buffer: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, CoreError>;

    /// Non-blocking counterpart; `completion` runs exactly once.
    async fn send_receive_async(&self, buffer: Vec<u8>, timeout: Duration, completion: Completion);

    /// Fire-and-forget. Default implementation delegates to
    /// `send_receive_async` with no completion; UDP/QUIC override this to
    /// use a dedicated datagram channel.
    async fn send_datagram(&self, buffer: Vec<u8>) -> Result<(), CoreError> {
        self.send_receive_async(buffer, Duration::from_secs(0), Box::new(|_| {})).await;
        Ok(())
    }

    /// Fire-and-forget for streaming-control frames; QUIC may override to
    /// dispatch onto the native stream keyed by the frame's stream id.
    async fn send_stream_message(&self, buffer: Vec<u8>) -> Result<(), CoreError> {
        self.send_datagram(buffer).await
    }

    fn close(&self);
    fn is_closed(&self) -> bool;

    /// A write buffer sized for an outbound message. The default is
    /// heap-backed; a shared-memory session overrides this to reserve
    /// directly in its send ring so the servant can write its reply with
    /// no intermediate copy.
    fn prepare_zero_copy_buffer(&self, size_hint: usize) -> nprpc_buffer::FlatBuffer {
        nprpc_buffer::FlatBuffer::with_capacity(size_hint)
    }
}

/// One item of outbound traffic, handed to the transport's write loop via
/// the session's FIFO channel.
pub struct OutboundItem {
    pub bytes: Vec<u8>,
}

struct PendingCall {
    responder: oneshot::Sender<Result<Vec<u8>, CoreError>>,
}

/// Shared bookkeeping embedded by every concrete `Session` implementation:
/// request-id allocation, the pending-call correlation table, the
/// outbound FIFO, and inactivity tracking.
pub struct SessionCore {
    next_request_id: AtomicU32,
    pending: Mutex<HashMap<u32, PendingCall>>,
    closed: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<OutboundItem>,
    last_activity: Mutex<Instant>,
    inactivity_timeout: Duration,
}

impl SessionCore {
    /// Returns the core plus the receiving half of its outbound FIFO,
    /// which the transport's write loop drains in order.
    pub fn new(inactivity_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<OutboundItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionCore {
                next_request_id: AtomicU32::new(1),
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                outbound_tx: tx,
                last_activity: Mutex::new(Instant::now()),
                inactivity_timeout,
            },
            rx,
        )
    }

    pub fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    /// Post `bytes` to the outbound FIFO. Guarantees in-order transmission
    /// relative to other calls on the same session.
    pub fn enqueue_outbound(&self, bytes: Vec<u8>) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        self.outbound_tx
            .send(OutboundItem { bytes })
            .map_err(|_| CoreError::CommFailure("outbound queue closed".to_string()))
    }

    /// Register a new pending call, returning its request id and the
    /// receiver side of its completion channel.
    pub fn register_pending(&self) -> (u32, oneshot::Receiver<Result<Vec<u8>, CoreError>>) {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, PendingCall { responder: tx });
        (id, rx)
    }

    /// Dispatch an inbound reply to its matching awaiter. A reply for an
    /// id with no pending entry (already timed out, or simply unknown) is
    /// silently dropped.
    pub fn resolve(&self, request_id: u32, result: Result<Vec<u8>, CoreError>) {
        if let Some(pending) = self.pending.lock().remove(&request_id) {
            let _ = pending.responder.send(result);
        }
    }

    pub fn cancel_pending(&self, request_id: u32) {
        self.pending.lock().remove(&request_id);
    }

    /// CAS-set the closed flag and fail every still-pending call with
    /// `SessionClosed`. Idempotent.
    pub fn close(&self) {
        if self.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            let pending = std::mem::take(&mut *self.pending.lock());
            for (_, call) in pending {
                let _ = call.responder.send(Err(CoreError::SessionClosed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_matching_awaiter() {
        let (core, mut outbound) = SessionCore::new(Duration::from_secs(30));
        let (id, rx) = core.register_pending();
        core.enqueue_outbound(vec![1, 2, 3]).unwrap();
        assert_eq!(outbound.recv().await.unwrap().bytes, vec![1, 2, 3]);

        core.resolve(id, Ok(vec![9, 9]));
        assert_eq!(rx.await.unwrap().unwrap(), vec![9, 9]);
    }

    #[tokio::test]
    async fn resolve_for_unknown_id_is_silently_dropped() {
        let (core, _outbound) = SessionCore::new(Duration::from_secs(30));
        core.resolve(404, Ok(vec![1]));
    }

    #[tokio::test]
    async fn close_fails_all_pending_with_session_closed() {
        let (core, _outbound) = SessionCore::new(Duration::from_secs(30));
        let (_id1, rx1) = core.register_pending();
        let (_id2, rx2) = core.register_pending();

        core.close();
        assert_eq!(rx1.await.unwrap(), Err(CoreError::SessionClosed));
        assert_eq!(rx2.await.unwrap(), Err(CoreError::SessionClosed));
        assert!(core.is_closed());
    }

    #[tokio::test]
    async fn enqueue_outbound_after_close_fails() {
        let (core, _outbound) = SessionCore::new(Duration::from_secs(30));
        core.close();
        assert_eq!(core.enqueue_outbound(vec![1]), Err(CoreError::SessionClosed));
    }

    #[tokio::test]
    async fn cancel_pending_removes_entry_without_resolving() {
        let (core, _outbound) = SessionCore::new(Duration::from_secs(30));
        let (id, rx) = core.register_pending();
        core.cancel_pending(id);
        core.resolve(id, Ok(vec![1]));
        // The oneshot sender was dropped by cancel_pending, not fulfilled.
        assert!(rx.await.is_err());
    }
}
