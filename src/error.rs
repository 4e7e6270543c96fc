//! The facade's unified error type. Every crate in the workspace already
//! derives its own `thiserror` enum (`CoreError`, `TransportError`,
//! `ShmError`, `RingError`, `BufferError`, `ProtocolError`, `StreamError`);
//! `nprpc::Error` just wraps whichever one a caller-facing operation
//! produced, the way `CoreError` itself wraps `ProtocolError`/`BufferError`
//! with `#[from]` instead of restating their variants.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("core: {0}")]
    Core(#[from] nprpc_core::CoreError),

    #[error("transport: {0}")]
    Transport(#[from] nprpc_transport::TransportError),

    #[error("shared memory: {0}")]
    Shm(#[from] nprpc_shm::ShmError),

    #[error("ring buffer: {0}")]
    Ring(#[from] nprpc_ring::RingError),

    #[error("buffer: {0}")]
    Buffer(#[from] nprpc_buffer::BufferError),

    #[error("wire protocol: {0}")]
    Protocol(#[from] nprpc_protocol::ProtocolError),

    #[error("stream: {0}")]
    Stream(#[from] nprpc_streams::StreamError),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
