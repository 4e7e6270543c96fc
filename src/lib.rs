//! NPRPC: a sessionful RPC runtime with pluggable transports (TCP,
//! WebSocket, HTTP, QUIC/HTTP3, UDP, shared memory), POA-based object
//! activation, and flow-controlled streaming. This crate is the thin
//! facade tying the `nprpc-*` library crates together into one running
//! [`Runtime`], in the style `services/forwarder` composes its own
//! subsystem crates behind a single `main`.

mod config;
mod error;
mod router;
mod runtime;
mod tls;

pub use config::{load_config, load_config_from_path, load_config_from_str, Config, ConfigError};
pub use error::Error;
pub use router::build_router;
pub use runtime::Runtime;
pub use tls::{build_https_server_config, build_quic_server_endpoint};

// Re-exported so servant authors only need one `use nprpc::...` path,
// matching `nprpc-core`'s own re-export of the `nprpc-protocol` types it
// builds on.
pub use nprpc_core::{
    ActivationFlags, CoreError, IdPolicy, ListenConfig, Lifespan, ObjectId, Poa, RpcCore, Servant, Session, SessionContext, SessionCore,
};
pub use nprpc_protocol::{Endpoint, MessageHeader, MessageKind, MessageType, HEADER_LEN};
pub use nprpc_streams::{StreamError, StreamEvent, StreamManager, StreamWriter};
pub use nprpc_transport::{NoopSsrForwarder, NoopStaticContentProvider, SsrForwarder, StaticContentProvider};

/// Installs a `tracing` subscriber reading its filter from
/// `config.log_level`, the way `services/forwarder::main` reads
/// `LOG_LEVEL` into `EnvFilter::new`. Safe to call more than once (e.g.
/// once per integration test binary) — later calls are no-ops.
pub fn init_tracing(config: &Config) {
    let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone())).try_init();
}
