//! QUIC driver (spec.md §4.I): one long-lived bidirectional stream carries
//! the request/reply traffic, framed exactly like TCP (`quinn`'s streams
//! implement `AsyncRead`/`AsyncWrite`, so [`crate::framing`] is reused
//! unchanged). Streaming RPC gets a fresh unidirectional stream per logical
//! stream id, one frame per `write_frame` call. `[unreliable]` methods and
//! unreliable streaming chunks ride the QUIC DATAGRAM extension instead.
//! An HTTP/3 listener built on `h3`/`h3-quinn` reuses the same dispatch
//! path as the plain HTTP driver.
//!
//! Grounded on other_examples `hdds/quic-connection.rs` (long-lived framed
//! send stream, lazily opened and reopened on failure) and
//! `salvo-rs/quinn-client.rs` / `security-union-h3/server.rs` for the h3
//! accept loop shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nprpc_core::{Completion, CoreError, MessageHeader, MessageType, RpcCore, SessionContext, SessionCore};
use nprpc_protocol::Endpoint;
use nprpc_streams::StreamManager;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::dispatch::dispatch_inbound;
use crate::framing::{patch_request_id, read_frame, write_frame};
use crate::ingress::{handle_inbound_frame, IngressAction};
use crate::stream_wire::dispatch_stream_frame;

pub struct QuicSession {
    connection: quinn::Connection,
    core: Arc<SessionCore>,
    streams: Arc<StreamManager>,
    outbound_streams: Arc<AsyncMutex<HashMap<u64, quinn::SendStream>>>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
    datagram_task: tokio::task::JoinHandle<()>,
    uni_accept_task: tokio::task::JoinHandle<()>,
}

impl QuicSession {
    /// Wraps an already-open `quinn::Connection`, opening the main
    /// bidirectional stream itself. Used by [`QuicConnector`]; the server
    /// side uses [`QuicSession::from_accepted`] since the peer opened it.
    pub async fn connect(connection: quinn::Connection, rpc_core: Arc<RpcCore>, inactivity_timeout: Duration) -> Result<Arc<Self>, CoreError> {
        let (send, recv) = connection
            .open_bi()
            .await
            .map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self::spawn(connection, send, recv, rpc_core, inactivity_timeout))
    }

    /// Used server-side once the peer's main bidi stream has been accepted.
    pub fn from_accepted(connection: quinn::Connection, send: quinn::SendStream, recv: quinn::RecvStream, rpc_core: Arc<RpcCore>, inactivity_timeout: Duration) -> Arc<Self> {
        Self::spawn(connection, send, recv, rpc_core, inactivity_timeout)
    }

    fn spawn(connection: quinn::Connection, mut send: quinn::SendStream, mut recv: quinn::RecvStream, rpc_core: Arc<RpcCore>, inactivity_timeout: Duration) -> Arc<Self> {
        let (session_core, mut outbound_rx) = SessionCore::new(inactivity_timeout);
        let session_core = Arc::new(session_core);
        let streams = Arc::new(StreamManager::new());
        nprpc_streams::spawn_idle_reaper(&streams);

        let writer_task = tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                if write_frame(&mut send, &item.bytes).await.is_err() {
                    break;
                }
            }
        });

        let reader_core = Arc::clone(&session_core);
        let reader_streams = Arc::clone(&streams);
        let reader_rpc_core = Arc::clone(&rpc_core);
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut recv).await {
                    Ok(Some(f)) => f,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "quic main-stream read error");
                        break;
                    }
                };
                match handle_inbound_frame(&reader_rpc_core, &reader_core, &reader_streams, frame).await {
                    IngressAction::Reply(reply, _context) => {
                        if reader_core.enqueue_outbound(reply).is_err() {
                            break;
                        }
                    }
                    IngressAction::Consumed => {}
                }
                if reader_core.is_closed() {
                    break;
                }
            }
            reader_core.close();
        });

        let datagram_conn = connection.clone();
        let datagram_core = Arc::clone(&session_core);
        let datagram_streams = Arc::clone(&streams);
        let datagram_rpc_core = Arc::clone(&rpc_core);
        let datagram_task = tokio::spawn(async move {
            loop {
                let datagram = match datagram_conn.read_datagram().await {
                    Ok(d) => d,
                    Err(_) => break,
                };
                let frame = datagram.to_vec();
                let Ok(header) = MessageHeader::decode(&frame) else { continue };
                if header.msg_type == MessageType::Answer {
                    datagram_core.resolve(header.request_id, Ok(frame));
                    continue;
                }
                if is_streaming_kind(header.kind) {
                    dispatch_stream_frame(&datagram_streams, header.kind, &frame[nprpc_core::HEADER_LEN..]);
                    continue;
                }
                let conn = datagram_conn.clone();
                let rpc_core = Arc::clone(&datagram_rpc_core);
                tokio::spawn(async move {
                    let (reply, _context) = dispatch_inbound(&rpc_core, &frame, SessionContext::default()).await;
                    let _ = conn.send_datagram(reply.into());
                });
            }
        });

        let uni_streams = Arc::clone(&streams);
        let uni_conn = connection.clone();
        let uni_accept_task = tokio::spawn(async move {
            loop {
                let mut recv = match uni_conn.accept_uni().await {
                    Ok(r) => r,
                    Err(_) => break,
                };
                let streams = Arc::clone(&uni_streams);
                tokio::spawn(async move {
                    loop {
                        match read_frame(&mut recv).await {
                            Ok(Some(frame)) => {
                                if let Ok(header) = MessageHeader::decode(&frame) {
                                    dispatch_stream_frame(&streams, header.kind, &frame[nprpc_core::HEADER_LEN..]);
                                }
                            }
                            _ => break,
                        }
                    }
                });
            }
        });

        Arc::new(QuicSession {
            connection,
            core: session_core,
            streams,
            outbound_streams: Arc::new(AsyncMutex::new(HashMap::new())),
            reader_task,
            writer_task,
            datagram_task,
            uni_accept_task,
        })
    }

    /// Lazily opens (and caches) the unidirectional stream used to carry a
    /// given logical streaming-RPC id's outbound frames.
    pub async fn send_stream_frame(&self, stream_id: u64, frame: Vec<u8>) -> Result<(), CoreError> {
        let mut guard = self.outbound_streams.lock().await;
        if !guard.contains_key(&stream_id) {
            let send = self
                .connection
                .open_uni()
                .await
                .map_err(|e| CoreError::CommFailure(e.to_string()))?;
            guard.insert(stream_id, send);
        }
        let stream = guard.get_mut(&stream_id).unwrap();
        write_frame(stream, &frame).await.map_err(|e| CoreError::CommFailure(e.to_string()))
    }

    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.streams
    }
}

fn is_streaming_kind(kind: nprpc_core::MessageKind) -> bool {
    use nprpc_core::MessageKind::*;
    matches!(kind, StreamInit | StreamDataChunk | StreamCompletion | StreamError | StreamCancellation)
}

#[async_trait]
impl nprpc_core::Session for QuicSession {
    async fn send_receive(&self, buffer: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, CoreError> {
        let (request_id, rx) = self.core.register_pending();
        let buffer = patch_request_id(buffer, request_id);
        self.core.enqueue_outbound(buffer)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::SessionClosed),
            Err(_) => {
                self.core.cancel_pending(request_id);
                Err(CoreError::Timeout)
            }
        }
    }

    async fn send_receive_async(&self, buffer: Vec<u8>, timeout: Duration, completion: Completion) {
        let (request_id, rx) = self.core.register_pending();
        let buffer = patch_request_id(buffer, request_id);
        if let Err(error) = self.core.enqueue_outbound(buffer) {
            completion(Err(error));
            return;
        }
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(CoreError::SessionClosed),
                Err(_) => Err(CoreError::Timeout),
            };
            completion(result);
        });
    }

    async fn send_datagram(&self, buffer: Vec<u8>) -> Result<(), CoreError> {
        self.connection.send_datagram(buffer.into()).map_err(|e| CoreError::CommFailure(e.to_string()))
    }

    fn close(&self) {
        self.core.close();
        self.reader_task.abort();
        self.writer_task.abort();
        self.datagram_task.abort();
        self.uni_accept_task.abort();
        self.connection.close(0u32.into(), b"session closed");
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

pub struct QuicConnector {
    endpoint: quinn::Endpoint,
    rpc_core: Arc<RpcCore>,
    inactivity_timeout: Duration,
}

impl QuicConnector {
    pub fn new(endpoint: quinn::Endpoint, rpc_core: Arc<RpcCore>, inactivity_timeout: Duration) -> Self {
        QuicConnector { endpoint, rpc_core, inactivity_timeout }
    }
}

#[async_trait]
impl nprpc_core::Connector for QuicConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn nprpc_core::Session>, CoreError> {
        let Endpoint::Quic { host, port } = endpoint else {
            return Err(CoreError::BadInput("QuicConnector only handles quic:// endpoints".to_string()));
        };
        let mut addrs = tokio::net::lookup_host((host.as_str(), *port))
            .await
            .map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;
        let addr = addrs.next().ok_or_else(|| CoreError::ConnectionFailed(format!("could not resolve {host}:{port}")))?;
        let connecting = self
            .endpoint
            .connect(addr, host)
            .map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;
        let connection = connecting.await.map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;
        let session = QuicSession::connect(connection, Arc::clone(&self.rpc_core), self.inactivity_timeout).await?;
        Ok(session as Arc<dyn nprpc_core::Session>)
    }
}

/// Accepts QUIC connections on `endpoint`, treating the peer's first
/// bidirectional stream as the RPC main channel.
pub async fn serve(endpoint: quinn::Endpoint, rpc_core: Arc<RpcCore>, inactivity_timeout: Duration, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let Some(incoming) = endpoint.accept().await else { break };
        let rpc_core = Arc::clone(&rpc_core);
        tokio::spawn(async move {
            let connection = match incoming.await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "quic handshake failed");
                    return;
                }
            };
            let (send, recv) = match connection.accept_bi().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "quic main stream accept failed");
                    return;
                }
            };
            QuicSession::from_accepted(connection, send, recv, rpc_core, inactivity_timeout);
        });
    }
}

/// HTTP/3 listener: each request body is treated as one opaque NPRPC
/// frame, dispatched the same way as the plain HTTP POST handler.
/// Grounded on `security-union-h3/server.rs`'s accept loop.
pub async fn serve_h3(endpoint: quinn::Endpoint, rpc_core: Arc<RpcCore>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let Some(incoming) = endpoint.accept().await else { break };
        let rpc_core = Arc::clone(&rpc_core);
        tokio::spawn(async move {
            let connection = match incoming.await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "h3 handshake failed");
                    return;
                }
            };
            let quinn_conn = h3_quinn::Connection::new(connection);
            let mut h3_conn = match h3::server::builder().build(quinn_conn).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "h3 connection setup failed");
                    return;
                }
            };
            loop {
                match h3_conn.accept().await {
                    Ok(Some((request, stream))) => {
                        let rpc_core = Arc::clone(&rpc_core);
                        tokio::spawn(async move {
                            if let Err(e) = handle_h3_request(request, stream, rpc_core).await {
                                warn!(error = %e, "h3 request failed");
                            }
                        });
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        });
    }
}

async fn handle_h3_request(
    request: http::Request<()>,
    mut stream: h3::server::RequestStream<h3_quinn::BidiStream<bytes::Bytes>, bytes::Bytes>,
    rpc_core: Arc<RpcCore>,
) -> Result<(), Box<dyn std::error::Error>> {
    use bytes::Buf;

    let cookies = request
        .headers()
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .map(nprpc_core::SessionContext::parse_cookie_header)
        .unwrap_or_default();
    let context = nprpc_core::SessionContext { cookies, set_cookies: Vec::new() };

    let mut body = Vec::new();
    while let Some(mut chunk) = stream.recv_data().await? {
        body.extend_from_slice(chunk.copy_to_bytes(chunk.remaining()).as_ref());
    }

    let (reply, context) = dispatch_inbound(&rpc_core, &body, context).await;

    let mut response = http::Response::builder().status(http::StatusCode::OK);
    for cookie in &context.set_cookies {
        response = response.header(http::header::SET_COOKIE, cookie.to_header_value());
    }
    let response = response.body(())?;
    stream.send_response(response).await?;
    stream.send_data(bytes::Bytes::from(reply)).await?;
    stream.finish().await?;
    Ok(())
}
