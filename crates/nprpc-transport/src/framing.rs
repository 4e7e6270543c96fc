//! Length-prefixed framing shared by the TCP and WebSocket drivers, and by
//! QUIC's long-lived per-connection stream. Wire format per spec.md §6:
//! `[u32 LE length][payload]`, identical across all of them so the same
//! codec config works everywhere.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::TransportError;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .little_endian()
        .max_frame_length(nprpc_ring::DEFAULT_MAX_MESSAGE_SIZE)
        .new_codec()
}

/// Read one `[u32 LE length][payload]` frame from a raw stream (used by
/// QUIC's send/receive streams, which don't go through `Framed`).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > nprpc_ring::DEFAULT_MAX_MESSAGE_SIZE {
        return Err(TransportError::Framing(format!("frame of {len} bytes exceeds the maximum")));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), TransportError> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Overwrites the request id field of an already-encoded message header
/// in place. Every socket-based `Session::send_receive*` impl calls this
/// right after `SessionCore::register_pending` allocates the real id,
/// since the caller encoded the frame before a request id was assigned.
pub fn patch_request_id(mut buffer: Vec<u8>, request_id: u32) -> Vec<u8> {
    if buffer.len() >= nprpc_core::HEADER_LEN {
        buffer[12..16].copy_from_slice(&request_id.to_le_bytes());
    }
    buffer
}
