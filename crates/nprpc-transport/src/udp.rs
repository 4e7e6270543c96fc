//! UDP driver (spec.md §4.I): datagrams carry the plain NPRPC message
//! header with no length prefix — each datagram IS one message. Unreliable
//! methods fire-and-forget; `[reliable]` methods attach a request id and
//! the sender retransmits on a timer (default 500ms, up to 3 retries)
//! until the matching reply arrives, using a `DelayQueue` for the retry
//! schedule the way the corpus's DNS-client code paces UDP retries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use nprpc_core::{Completion, CoreError, MessageHeader, MessageType, RpcCore, SessionContext, SessionCore};
use nprpc_protocol::Endpoint;
use tokio::net::UdpSocket;
use tokio_util::time::DelayQueue;
use tracing::warn;

use crate::dispatch::dispatch_inbound;
use crate::framing::patch_request_id;

const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(500);
const MAX_RETRIES: u32 = 3;
const MAX_DATAGRAM: usize = 65_507;

type SessionTable = Arc<DashMap<SocketAddr, Arc<SessionCore>>>;

pub struct UdpSession {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    core: Arc<SessionCore>,
}

impl UdpSession {
    async fn send_with_retries(&self, buffer: &[u8], mut rx: tokio::sync::oneshot::Receiver<Result<Vec<u8>, CoreError>>, timeout: Duration) -> Result<Vec<u8>, CoreError> {
        self.socket
            .send_to(buffer, self.peer)
            .await
            .map_err(|e| CoreError::CommFailure(e.to_string()))?;

        let mut retries = 0u32;
        let mut delays = DelayQueue::new();
        delays.insert((), RETRANSMIT_INTERVAL);

        tokio::time::timeout(timeout, async {
            loop {
                tokio::select! {
                    reply = &mut rx => {
                        return reply.map_err(|_| CoreError::SessionClosed)?;
                    }
                    fired = delays.next() => {
                        if fired.is_none() {
                            continue;
                        }
                        if retries >= MAX_RETRIES {
                            return Err(CoreError::Timeout);
                        }
                        retries += 1;
                        let _ = self.socket.send_to(buffer, self.peer).await;
                        delays.insert((), RETRANSMIT_INTERVAL);
                    }
                }
            }
        })
        .await
        .unwrap_or(Err(CoreError::Timeout))
    }
}

#[async_trait]
impl nprpc_core::Session for UdpSession {
    async fn send_receive(&self, buffer: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, CoreError> {
        let (request_id, rx) = self.core.register_pending();
        let buffer = patch_request_id(buffer, request_id);
        let result = self.send_with_retries(&buffer, rx, timeout).await;
        if result.is_err() {
            self.core.cancel_pending(request_id);
        }
        result
    }

    async fn send_receive_async(&self, buffer: Vec<u8>, timeout: Duration, completion: Completion) {
        let (request_id, rx) = self.core.register_pending();
        let buffer = patch_request_id(buffer, request_id);
        let socket = Arc::clone(&self.socket);
        let peer = self.peer;
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            let session = UdpSession { socket, peer, core: Arc::clone(&core) };
            let result = session.send_with_retries(&buffer, rx, timeout).await;
            if result.is_err() {
                core.cancel_pending(request_id);
            }
            completion(result);
        });
    }

    async fn send_datagram(&self, buffer: Vec<u8>) -> Result<(), CoreError> {
        self.socket
            .send_to(&buffer, self.peer)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::CommFailure(e.to_string()))
    }

    fn close(&self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

fn session_for(sessions: &SessionTable, socket: &Arc<UdpSocket>, peer: SocketAddr, inactivity_timeout: Duration) -> Arc<SessionCore> {
    Arc::clone(sessions.entry(peer).or_insert_with(|| {
        let (core, mut outbound_rx) = SessionCore::new(inactivity_timeout);
        let core = Arc::new(core);
        // UDP has no ordered FIFO to drain (every send goes straight out
        // via `send_to`); this loop only exists so a stray `enqueue_outbound`
        // call (e.g. from a servant using the generic session contract)
        // still reaches the wire.
        let drain_socket = Arc::clone(socket);
        tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                let _ = drain_socket.send_to(&item.bytes, peer).await;
            }
        });
        core
    }))
}

/// Drives inbound traffic for `socket`, dispatching `FunctionCall`s
/// through the generic path and resolving pending calls for `Answer`s.
/// Used both by a server bound to a well-known port and by a client's
/// ephemeral per-connector socket.
pub async fn recv_loop(socket: Arc<UdpSocket>, rpc_core: Arc<RpcCore>, sessions: SessionTable, inactivity_timeout: Duration) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "udp recv failed");
                continue;
            }
        };
        let frame = buf[..len].to_vec();
        let header = match MessageHeader::decode(&frame) {
            Ok(h) => h,
            Err(_) => continue,
        };

        if header.msg_type == MessageType::Answer {
            if let Some(core) = sessions.get(&peer) {
                core.resolve(header.request_id, Ok(frame));
            }
            continue;
        }

        let core = session_for(&sessions, &socket, peer, inactivity_timeout);
        core.touch();
        let reply_socket = Arc::clone(&socket);
        let rpc_core = Arc::clone(&rpc_core);
        tokio::spawn(async move {
            let (reply, _context) = dispatch_inbound(&rpc_core, &frame, SessionContext::default()).await;
            let _ = reply_socket.send_to(&reply, peer).await;
        });
    }
}

pub struct UdpConnector {
    rpc_core: Arc<RpcCore>,
    inactivity_timeout: Duration,
}

impl UdpConnector {
    pub fn new(rpc_core: Arc<RpcCore>, inactivity_timeout: Duration) -> Self {
        UdpConnector { rpc_core, inactivity_timeout }
    }
}

#[async_trait]
impl nprpc_core::Connector for UdpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn nprpc_core::Session>, CoreError> {
        let Endpoint::Udp { host, port } = endpoint else {
            return Err(CoreError::BadInput("UdpConnector only handles udp:// endpoints".to_string()));
        };
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;
        let peer: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| CoreError::BadInput(format!("invalid udp peer address {host}:{port}")))?;
        let socket = Arc::new(socket);
        let sessions: SessionTable = Arc::new(DashMap::new());
        let core = session_for(&sessions, &socket, peer, self.inactivity_timeout);

        tokio::spawn(recv_loop(Arc::clone(&socket), Arc::clone(&self.rpc_core), Arc::clone(&sessions), self.inactivity_timeout));

        Ok(Arc::new(UdpSession { socket, peer, core }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nprpc_core::{ActivationFlags, IdPolicy, Lifespan, ListenConfig, Poa, Servant};
    use uuid::Uuid;

    struct Echo;
    impl Servant for Echo {
        fn class_id(&self) -> &str {
            "Echo"
        }
        fn dispatch(&self, _function_idx: u32, params: &[u8]) -> Result<Vec<u8>, CoreError> {
            Ok(params.to_vec())
        }
    }

    fn empty_listen_config() -> ListenConfig {
        ListenConfig {
            hostname: "127.0.0.1".to_string(),
            tcp_port: None,
            ws_port: None,
            http_port: None,
            quic_port: None,
            udp_port: Some(0),
            shared_memory_listener_uuid: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_function_call_over_udp() {
        let rpc_core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let poa = rpc_core
            .register_poa(Poa::new("root", 0, Lifespan::Transient, IdPolicy::SystemGenerated, rpc_core.process_uuid))
            .unwrap();
        let object_id = poa
            .activate_object(Arc::new(Echo), ActivationFlags::ALLOW_UDP, &empty_listen_config(), None)
            .unwrap();

        let server_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server_socket.local_addr().unwrap();
        let server_sessions: SessionTable = Arc::new(DashMap::new());
        tokio::spawn(recv_loop(server_socket, Arc::clone(&rpc_core), server_sessions, Duration::from_secs(30)));

        let connector = UdpConnector::new(Arc::clone(&rpc_core), Duration::from_secs(30));
        let endpoint = Endpoint::Udp { host: "127.0.0.1".to_string(), port: server_addr.port() };
        let session = connector.connect(&endpoint).await.unwrap();

        let mut body = 0u16.to_le_bytes().to_vec();
        body.extend_from_slice(&object_id.object_id.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(b"ping");
        let header = MessageHeader {
            size: (nprpc_core::HEADER_LEN + body.len()) as u32,
            kind: nprpc_core::MessageKind::FunctionCall,
            msg_type: MessageType::Request,
            request_id: 0,
        };
        let mut frame = header.encode();
        frame.extend_from_slice(&body);

        let reply = session.send_receive(frame, Duration::from_secs(5)).await.unwrap();
        assert_eq!(&reply[nprpc_core::HEADER_LEN..], b"ping");
    }
}
