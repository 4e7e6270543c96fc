use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid endpoint: {0:?}")]
    InvalidEndpoint(String),

    #[error("malformed message: {0}")]
    BadInput(String),
}
