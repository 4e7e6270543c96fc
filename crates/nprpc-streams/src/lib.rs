//! Per-session stream registry and flow control for NPRPC's streaming RPC
//! kinds (`StreamInit`/`StreamDataChunk`/`StreamCompletion`/`StreamError`/
//! `StreamCancellation`). Transport drivers in `nprpc-transport` own the
//! wire encoding; this crate owns registry bookkeeping, reordering, window
//! flow control, cancellation, and inactivity timeouts.

mod error;
mod registry;

pub use error::{ExceptionValue, StreamError};
pub use registry::{
    spawn_idle_reaper, StreamEvent, StreamKind, StreamManager, StreamWriter, DEFAULT_WINDOW, REORDER_WINDOW,
    STREAM_INACTIVITY_TIMEOUT,
};
