//! The default [`StreamWriter`]: pushes stream frames onto a session's
//! ordinary outbound FIFO (the "main-stream send" callback spec.md §4.H
//! describes), used by every transport that has no cheaper native-stream
//! or datagram path available.

use std::sync::Arc;

use async_trait::async_trait;
use nprpc_core::SessionCore;
use nprpc_streams::{StreamError, StreamWriter};

use crate::stream_wire::{encode_stream_cancellation, encode_stream_chunk, encode_stream_completion, encode_stream_error};

pub struct MainStreamWriter {
    session_core: Arc<SessionCore>,
    stream_id: u64,
}

impl MainStreamWriter {
    pub fn new(session_core: Arc<SessionCore>, stream_id: u64) -> Self {
        MainStreamWriter { session_core, stream_id }
    }

    fn enqueue(&self, frame: Vec<u8>) -> Result<(), StreamError> {
        self.session_core.enqueue_outbound(frame).map_err(|_| StreamError::SessionClosed)
    }
}

#[async_trait]
impl StreamWriter for MainStreamWriter {
    async fn write_chunk(&self, seq: u64, bytes: Vec<u8>) -> Result<(), StreamError> {
        self.enqueue(encode_stream_chunk(self.stream_id, seq, &bytes, self.session_core.next_request_id()))
    }

    async fn write_complete(&self, final_seq: u64) -> Result<(), StreamError> {
        self.enqueue(encode_stream_completion(self.stream_id, final_seq, self.session_core.next_request_id()))
    }

    async fn write_error(&self, error: &StreamError) -> Result<(), StreamError> {
        let data = match error {
            StreamError::PeerError(bytes) => bytes.clone(),
            other => other.to_string().into_bytes(),
        };
        self.enqueue(encode_stream_error(self.stream_id, 0, &data, self.session_core.next_request_id()))
    }

    async fn write_cancel(&self) -> Result<(), StreamError> {
        self.enqueue(encode_stream_cancellation(self.stream_id, self.session_core.next_request_id()))
    }
}
