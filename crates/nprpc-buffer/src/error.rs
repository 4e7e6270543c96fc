use thiserror::Error;

/// Errors produced by [`crate::FlatBuffer`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// A strict-view buffer's `prepare` call would have grown past its
    /// reservation; the caller asked for `BufferOverflow` instead of a
    /// silent heap demotion.
    #[error("buffer overflow: requested {requested} bytes, {available} available in view")]
    Overflow { requested: usize, available: usize },

    /// `consume` (or a header decode built on top of it) asked for more
    /// bytes than are currently committed.
    #[error("short read: requested {requested} bytes, {available} available")]
    ShortRead { requested: usize, available: usize },
}
