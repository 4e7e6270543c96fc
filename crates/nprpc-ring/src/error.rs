use thiserror::Error;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("mmap failed: {0}")]
    Mmap(#[source] std::io::Error),

    #[error("message of {requested} bytes exceeds max_message_size {max}")]
    MessageTooLarge { requested: usize, max: usize },

    #[error("ring capacity ({capacity}) must be a multiple of the page size")]
    BadCapacity { capacity: usize },
}
