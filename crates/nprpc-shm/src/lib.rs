//! Shared-memory transport: paired lock-free rings forming a bidirectional
//! channel, and a well-known listener clients use to request one.
//!
//! Orphaned rings are unlinked whenever either end's [`ShmRing`] or
//! [`Channel`]/[`Listener`] drops; on a clean restart there is no explicit
//! "sweep stale rings" step because POSIX shared memory objects are
//! process-lifetime-independent only in name — the first process to
//! `shm_open(O_CREAT)` a given name after a crash simply reinitializes it.

mod channel;
mod error;
mod handshake;
mod listener;
mod pthread_sync;
mod segment;

pub use channel::{Channel, ChannelCallback};
pub use error::ShmError;
pub use handshake::{HandshakeMessage, ReadyFlag, HANDSHAKE_MAGIC, HANDSHAKE_VERSION};
pub use listener::{connect, listener_ring_name, Listener, OnConnect};
pub use segment::{Role, ShmRing};
