//! Transport drivers (spec.md §4.I, §4.J): TCP, WebSocket, HTTP request
//! path, UDP, QUIC (+ HTTP/3), and shared memory, all converging on the
//! same generic dispatch path in [`dispatch`] and [`ingress`].

mod dispatch;
mod error;
mod framing;
mod http;
mod ingress;
mod main_stream_writer;
mod quic;
mod shared_memory;
mod stream_wire;
mod tcp;
mod udp;
mod websocket;

pub use dispatch::dispatch_inbound;
pub use error::TransportError;
pub use framing::{codec, patch_request_id, read_frame, write_frame};
pub use http::{rpc_post_handler, NoopSsrForwarder, NoopStaticContentProvider, SsrForwarder, StaticContentProvider};
pub use ingress::{handle_inbound_frame, handle_inbound_frame_with_context, IngressAction};
pub use main_stream_writer::MainStreamWriter;
pub use quic::{serve as quic_serve, serve_h3, QuicConnector, QuicSession};
pub use shared_memory::{serve as shm_serve, ShmConnector, ShmSession};
pub use stream_wire::{
    dispatch_stream_frame, encode_stream_cancellation, encode_stream_chunk, encode_stream_completion, encode_stream_error, encode_stream_init,
};
pub use tcp::{serve as tcp_serve, TcpConnector, TcpSession};
pub use udp::{recv_loop as udp_recv_loop, UdpConnector, UdpSession};
pub use websocket::{ws_upgrade_handler, WsConnector, WsSession};

/// Registers every protocol [`nprpc_core::Connector`] with `rpc_core` so
/// client-side code can dial any [`nprpc_protocol::Endpoint`] scheme
/// without picking a driver by hand.
pub fn register_default_connectors(rpc_core: &std::sync::Arc<nprpc_core::RpcCore>, inactivity_timeout: std::time::Duration) {
    rpc_core.register_connector("tcp", std::sync::Arc::new(TcpConnector::new(std::sync::Arc::clone(rpc_core), inactivity_timeout)));
    rpc_core.register_connector("ws", std::sync::Arc::new(WsConnector::new(std::sync::Arc::clone(rpc_core), inactivity_timeout)));
    rpc_core.register_connector("wss", std::sync::Arc::new(WsConnector::new(std::sync::Arc::clone(rpc_core), inactivity_timeout)));
    rpc_core.register_connector("udp", std::sync::Arc::new(UdpConnector::new(std::sync::Arc::clone(rpc_core), inactivity_timeout)));
}
