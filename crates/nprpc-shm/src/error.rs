use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shared memory object {name:?} could not be opened: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ring backend error: {0}")]
    Ring(#[from] nprpc_ring::RingError),

    #[error("handshake magic/version mismatch")]
    HandshakeMismatch,

    #[error("timed out waiting for peer to become ready")]
    Timeout,

    #[error("connection could not be established: {0}")]
    ConnectionFailed(String),
}
