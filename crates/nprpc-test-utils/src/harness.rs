//! An in-process node: one [`nprpc_core::RpcCore`] with a root POA and
//! whichever transport listeners a test asks for, all bound to ephemeral
//! loopback ports. Grounded on the corpus's `MockWsServer` (bind on port
//! 0, report the real port back, run the accept loop in a background
//! task) generalized from "one WebSocket listener" to "any subset of
//! NPRPC's transport drivers".

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use axum::routing::post;
use nprpc_core::{ActivationFlags, IdPolicy, Lifespan, ListenConfig, ObjectId, Poa, RpcCore, Servant};
use tokio::net::{TcpListener, UdpSocket};
use uuid::Uuid;

const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
const SHM_RING_CAPACITY: usize = 1 << 16;
const SHM_MAX_MESSAGE_SIZE: usize = 1 << 16;

/// A running node under test. Dropping it tears down its shared-memory
/// listener (if any); the spawned TCP/HTTP/UDP accept loops are detached
/// background tasks, same as the rest of this crate's `serve` functions.
pub struct TestNode {
    pub rpc_core: Arc<RpcCore>,
    pub poa: Arc<Poa>,
    pub listen: ListenConfig,
    inactivity_timeout: Duration,
    _shm_listener: Option<nprpc_shm::Listener>,
}

impl TestNode {
    pub fn tcp_addr(&self) -> SocketAddr {
        let port = self.listen.tcp_port.expect("node was built with_tcp()");
        format!("{}:{port}", self.listen.hostname).parse().unwrap()
    }

    pub fn http_addr(&self) -> SocketAddr {
        let port = self.listen.http_port.expect("node was built with_http()");
        format!("{}:{port}", self.listen.hostname).parse().unwrap()
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/rpc", self.http_addr())
    }

    pub fn udp_addr(&self) -> SocketAddr {
        let port = self.listen.udp_port.expect("node was built with_udp()");
        format!("{}:{port}", self.listen.hostname).parse().unwrap()
    }

    pub fn shm_listener_uuid(&self) -> Uuid {
        self.listen.shared_memory_listener_uuid.expect("node was built with_shared_memory()")
    }

    /// Activates `servant` on the node's root POA with `flags`, returning
    /// the resulting [`ObjectId`] (including its synthesized URL list).
    pub fn activate<S: Servant + 'static>(&self, servant: S, flags: ActivationFlags) -> ObjectId {
        self.poa.activate_object(Arc::new(servant), flags, &self.listen, None).unwrap()
    }

    /// Registers the generic TCP/WS/UDP connectors against this node's
    /// own `rpc_core`, for tests that want to dial back out through
    /// `RpcCore::call` instead of driving a transport session directly.
    pub fn register_default_connectors(&self) {
        nprpc_transport::register_default_connectors(&self.rpc_core, self.inactivity_timeout);
    }
}

#[derive(Default)]
pub struct TestNodeBuilder {
    tcp: bool,
    http: bool,
    udp: bool,
    shm: bool,
    inactivity_timeout: Option<Duration>,
}

impl TestNodeBuilder {
    pub fn new() -> Self {
        TestNodeBuilder::default()
    }

    pub fn with_tcp(mut self) -> Self {
        self.tcp = true;
        self
    }

    pub fn with_http(mut self) -> Self {
        self.http = true;
        self
    }

    pub fn with_udp(mut self) -> Self {
        self.udp = true;
        self
    }

    pub fn with_shared_memory(mut self) -> Self {
        self.shm = true;
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> TestNode {
        let inactivity_timeout = self.inactivity_timeout.unwrap_or(DEFAULT_INACTIVITY_TIMEOUT);
        let rpc_core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let poa = rpc_core
            .register_poa(Poa::new("root", 0, Lifespan::Transient, IdPolicy::SystemGenerated, rpc_core.process_uuid))
            .unwrap();

        let mut listen = ListenConfig {
            hostname: "127.0.0.1".to_string(),
            tcp_port: None,
            ws_port: None,
            http_port: None,
            quic_port: None,
            udp_port: None,
            shared_memory_listener_uuid: None,
        };

        if self.tcp {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listen.tcp_port = Some(listener.local_addr().unwrap().port());
            let core = Arc::clone(&rpc_core);
            tokio::spawn(nprpc_transport::tcp_serve(listener, core, inactivity_timeout, Arc::new(AtomicBool::new(false))));
        }

        if self.http {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listen.http_port = Some(listener.local_addr().unwrap().port());
            let router = axum::Router::new()
                .route("/rpc", post(nprpc_transport::rpc_post_handler))
                .with_state(Arc::clone(&rpc_core));
            tokio::spawn(async move {
                axum::serve(listener, router).await.ok();
            });
        }

        if self.udp {
            let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
            listen.udp_port = Some(socket.local_addr().unwrap().port());
            let sessions: Arc<dashmap::DashMap<SocketAddr, Arc<nprpc_core::SessionCore>>> = Arc::new(dashmap::DashMap::new());
            let core = Arc::clone(&rpc_core);
            tokio::spawn(nprpc_transport::udp_recv_loop(socket, core, sessions, inactivity_timeout));
        }

        let shm_listener = if self.shm {
            let listener_uuid = Uuid::new_v4();
            listen.shared_memory_listener_uuid = Some(listener_uuid);
            let (listener, _sessions) =
                nprpc_transport::shm_serve(Arc::clone(&rpc_core), listener_uuid, SHM_RING_CAPACITY, SHM_MAX_MESSAGE_SIZE, inactivity_timeout).unwrap();
            Some(listener)
        } else {
            None
        };

        TestNode {
            rpc_core,
            poa,
            listen,
            inactivity_timeout,
            _shm_listener: shm_listener,
        }
    }
}

/// Connects a [`nprpc_transport::ShmConnector`]-backed session to the
/// shared-memory listener identified by `listener_uuid` (typically a
/// node's own [`TestNode::shm_listener_uuid`]), with ring parameters
/// matching [`SHM_RING_CAPACITY`]/[`SHM_MAX_MESSAGE_SIZE`].
pub async fn connect_shared_memory(rpc_core: Arc<RpcCore>, listener_uuid: Uuid, inactivity_timeout: Duration) -> Arc<dyn nprpc_core::Session> {
    use nprpc_core::Connector;
    let connector = nprpc_transport::ShmConnector::new(rpc_core, inactivity_timeout, SHM_RING_CAPACITY, SHM_MAX_MESSAGE_SIZE, Duration::from_secs(5));
    connector
        .connect(&nprpc_protocol::Endpoint::SharedMemory { listener_uuid })
        .await
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{function_call, split_reply, EchoServant};
    use nprpc_core::MessageKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn tcp_node_echoes_a_function_call() {
        let node = TestNodeBuilder::new().with_tcp().build().await;
        let object_id = node.activate(EchoServant, ActivationFlags::ALLOW_TCP);

        let mut stream = TcpStream::connect(node.tcp_addr()).await.unwrap();
        let request = function_call(&object_id, 0, b"hello");
        stream.write_all(&request).await.unwrap();

        let mut header_buf = [0u8; nprpc_core::HEADER_LEN];
        stream.read_exact(&mut header_buf).await.unwrap();
        let header = nprpc_core::MessageHeader::decode(&header_buf).unwrap();
        let mut body = vec![0u8; header.size as usize - nprpc_core::HEADER_LEN];
        stream.read_exact(&mut body).await.unwrap();

        let mut frame = header_buf.to_vec();
        frame.extend_from_slice(&body);
        let (kind, reply_body) = split_reply(&frame);
        assert_eq!(kind, MessageKind::FunctionCall);
        assert_eq!(reply_body, b"hello");
    }

    #[tokio::test]
    async fn http_node_serves_rpc_over_post() {
        let node = TestNodeBuilder::new().with_http().build().await;
        let object_id = node.activate(EchoServant, ActivationFlags::ALLOW_HTTP);

        let body = function_call(&object_id, 0, b"world");
        let mut request = format!(
            "POST /rpc HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            node.http_addr(),
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);

        let mut stream = TcpStream::connect(node.http_addr()).await.unwrap();
        stream.write_all(&request).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let split_at = response.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let frame = &response[split_at..];

        let (kind, reply_body) = split_reply(frame);
        assert_eq!(kind, MessageKind::FunctionCall);
        assert_eq!(reply_body, b"world");
    }
}
