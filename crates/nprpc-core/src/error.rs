use thiserror::Error;

/// The full error taxonomy a session, POA, or the RPC core can produce.
/// Each variant is a distinct kind, never a bare string, so callers can
/// match on it instead of parsing messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("poa does not exist")]
    PoaNotExist,

    #[error("object does not exist")]
    ObjectNotExist,

    #[error("unknown function index {0}")]
    UnknownFunctionIdx(u32),

    #[error("unknown message id")]
    UnknownMessageId,

    #[error("bad access: {0}")]
    BadAccess(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("transport communication failure: {0}")]
    CommFailure(String),

    #[error("operation timed out")]
    Timeout,

    #[error("session closed")]
    SessionClosed,

    #[error("could not establish connection: {0}")]
    ConnectionFailed(String),

    #[error("servant exception")]
    Exception(Vec<u8>),

    #[error("buffer overflow")]
    BufferOverflow,
}

impl From<nprpc_protocol::ProtocolError> for CoreError {
    fn from(err: nprpc_protocol::ProtocolError) -> Self {
        CoreError::BadInput(err.to_string())
    }
}

impl From<nprpc_buffer::BufferError> for CoreError {
    fn from(_: nprpc_buffer::BufferError) -> Self {
        CoreError::BufferOverflow
    }
}
