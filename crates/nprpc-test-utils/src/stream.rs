//! Bridges a live [`nprpc_core::Session`] into a [`StreamWriter`] by
//! encoding each call through [`nprpc_transport`]'s stream wire helpers
//! and pushing it out over `send_stream_message` — the same path a real
//! transport driver's own outbound streaming code would take, just
//! invoked directly from test code instead of from a servant.
//!
//! Grounded on `nprpc-streams::registry`'s own `RecordingWriter` test
//! double (see `nprpc-streams/src/registry.rs`), generalized from an
//! in-memory recorder to one that actually puts bytes on a session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nprpc_streams::{StreamError, StreamEvent};
use tokio::sync::mpsc;

/// Drives a stream's write side over `session`, tagging every frame with
/// `stream_id` the way a session's own stream table would.
pub struct SessionStreamWriter {
    session: Arc<dyn nprpc_core::Session>,
    stream_id: u64,
}

impl SessionStreamWriter {
    pub fn new(session: Arc<dyn nprpc_core::Session>, stream_id: u64) -> Self {
        SessionStreamWriter { session, stream_id }
    }
}

#[async_trait]
impl nprpc_streams::StreamWriter for SessionStreamWriter {
    async fn write_chunk(&self, seq: u64, bytes: Vec<u8>) -> Result<(), StreamError> {
        let frame = nprpc_transport::encode_stream_chunk(self.stream_id, seq, &bytes, 0);
        self.session.send_stream_message(frame).await.map_err(|e| StreamError::WriteFailed(e.to_string()))
    }

    async fn write_complete(&self, final_seq: u64) -> Result<(), StreamError> {
        let frame = nprpc_transport::encode_stream_completion(self.stream_id, final_seq, 0);
        self.session.send_stream_message(frame).await.map_err(|e| StreamError::WriteFailed(e.to_string()))
    }

    async fn write_error(&self, error: &StreamError) -> Result<(), StreamError> {
        let frame = nprpc_transport::encode_stream_error(self.stream_id, 0, error.to_string().as_bytes(), 0);
        self.session.send_stream_message(frame).await.map_err(|e| StreamError::WriteFailed(e.to_string()))
    }

    async fn write_cancel(&self) -> Result<(), StreamError> {
        let frame = nprpc_transport::encode_stream_cancellation(self.stream_id, 0);
        self.session.send_stream_message(frame).await.map_err(|e| StreamError::WriteFailed(e.to_string()))
    }
}

/// Pulls every event currently queued (or arriving within `timeout`) off
/// a stream reader, stopping at the first `Completed`/`Failed`/
/// `Cancelled` terminal event.
pub async fn drain_stream_events(mut rx: mpsc::UnboundedReceiver<StreamEvent>, timeout: Duration) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => {
                let terminal = matches!(event, StreamEvent::Completed | StreamEvent::Failed(_) | StreamEvent::Cancelled);
                events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    events
}
