use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("quic error: {0}")]
    Quic(String),

    #[error("core error: {0}")]
    Core(#[from] nprpc_core::CoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] nprpc_protocol::ProtocolError),
}
