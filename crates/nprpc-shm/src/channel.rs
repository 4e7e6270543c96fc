//! A bidirectional channel: a pair of rings plus a reader thread that
//! drains the receive ring and posts messages to the owner.

use crate::segment::ShmRing;
use crate::ShmError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// How a channel hands received messages back to its owner. At most one
/// of the two is active per channel: `Owned` copies the payload out (safe
/// to hold past the callback returning), `View` hands out a borrow of the
/// ring's internal buffer for zero-copy consumption that must not escape
/// the callback.
pub enum ChannelCallback {
    Owned(Arc<dyn Fn(Vec<u8>) + Send + Sync>),
    View(Arc<dyn Fn(&[u8]) + Send + Sync>),
}

pub struct Channel {
    send: ShmRing,
    recv: Arc<ShmRing>,
    stop: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl Channel {
    pub(crate) fn spawn(send: ShmRing, recv: ShmRing, callback: ChannelCallback) -> Self {
        let recv = Arc::new(recv);
        let stop = Arc::new(AtomicBool::new(false));

        let reader_recv = Arc::clone(&recv);
        let reader_stop = Arc::clone(&stop);
        let reader = std::thread::spawn(move || {
            while !reader_stop.load(Ordering::Acquire) {
                match reader_recv.ring.try_read_view() {
                    Some(view) => {
                        match &callback {
                            ChannelCallback::Owned(f) => f(view.bytes().to_vec()),
                            ChannelCallback::View(f) => f(view.bytes()),
                        }
                        reader_recv.ring.commit_read(view);
                    }
                    None => reader_recv.ring.wait_for_data(POLL_TIMEOUT),
                }
            }
        });

        Channel {
            send,
            recv,
            stop,
            reader: Some(reader),
        }
    }

    /// Write `bytes` as one message, blocking (with periodic retries)
    /// until the send ring has room.
    pub fn send(&self, bytes: &[u8], retry_timeout: Duration) -> Result<(), ShmError> {
        loop {
            if let Some(mut reservation) = self.send.ring.try_reserve_write(bytes.len())? {
                reservation.bytes_mut().copy_from_slice(bytes);
                self.send.ring.commit_write(reservation, bytes.len());
                return Ok(());
            }
            self.send.ring.wait_for_space(retry_timeout);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // The reader thread wakes at most POLL_TIMEOUT after this and
        // observes `stop`; there's no peer-side "wake my own reader" call
        // on Ring, so shutdown latency is bounded by POLL_TIMEOUT rather
        // than immediate.
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}
