use thiserror::Error;

/// Exception payload carried by a terminal `StreamError` wire message,
/// opaque to the stream manager itself (decoded by the servant's
/// generated exception type).
pub type ExceptionValue = Vec<u8>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream {0} timed out waiting for activity")]
    Timeout(u64),

    #[error("session closed")]
    SessionClosed,

    #[error("stream {0} was cancelled")]
    Cancelled(u64),

    #[error("peer reported a stream error")]
    PeerError(ExceptionValue),

    #[error("stream {0} exceeded its reorder window")]
    ReorderWindowExceeded(u64),

    #[error("stream {0} is unknown or already removed")]
    UnknownStream(u64),

    #[error("transport failed to write: {0}")]
    WriteFailed(String),
}
