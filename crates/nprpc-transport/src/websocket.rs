//! WebSocket (+TLS) driver. Each NPRPC frame travels as one WS Binary
//! message — WS already preserves message boundaries, so unlike TCP no
//! length prefix is added. Server side grounded on the corpus's
//! `ws_forwarder_handler` (axum `WebSocketUpgrade`, select! read/heartbeat
//! loop); client side grounded on `UplinkSession::connect`
//! (`tokio-tungstenite::connect_async` + cookie/auth header on the
//! upgrade request).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use nprpc_core::{Completion, CoreError, RpcCore, SessionContext, SessionCore};
use nprpc_protocol::Endpoint;
use nprpc_streams::StreamManager;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::warn;

use crate::ingress::{handle_inbound_frame_with_context, IngressAction};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct WsSession {
    core: Arc<SessionCore>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl nprpc_core::Session for WsSession {
    async fn send_receive(&self, buffer: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, CoreError> {
        let (request_id, rx) = self.core.register_pending();
        let buffer = crate::framing::patch_request_id(buffer, request_id);
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
        let buffer = crate::framing::patch_request_id(buffer, request_id);
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

    fn close(&self) {
        self.core.close();
        self.reader_task.abort();
        self.writer_task.abort();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

fn extract_cookie_context(headers: &HeaderMap) -> SessionContext {
    let cookies = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .map(SessionContext::parse_cookie_header)
        .unwrap_or_default();
    SessionContext { cookies, set_cookies: Vec::new() }
}

/// axum handler: `GET /rpc` upgrades to WebSocket and hands the socket to
/// [`run_server_socket`].
pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(rpc_core): State<Arc<RpcCore>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let context = extract_cookie_context(&headers);
    ws.on_upgrade(move |socket| run_server_socket(socket, rpc_core, context, Duration::from_secs(90)))
}

async fn run_server_socket(socket: WebSocket, rpc_core: Arc<RpcCore>, context: SessionContext, inactivity_timeout: Duration) {
    let (mut sink, mut source) = socket.split();
    let (session_core, mut outbound_rx) = SessionCore::new(inactivity_timeout);
    let session_core = Arc::new(session_core);
    let streams = Arc::new(StreamManager::new());
    nprpc_streams::spawn_idle_reaper(&streams);

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(item) => {
                        if sink.send(AxumMessage::Binary(item.bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(AxumMessage::Binary(bytes))) => {
                        session_core.touch();
                        let reply = handle_inbound_frame_with_context(
                            &rpc_core,
                            &session_core,
                            &streams,
                            bytes.to_vec(),
                            context.clone(),
                        )
                        .await;
                        if let IngressAction::Reply(bytes, _context) = reply {
                            if sink.send(AxumMessage::Binary(bytes.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(AxumMessage::Ping(data))) => {
                        let _ = sink.send(AxumMessage::Pong(data)).await;
                    }
                    Some(Ok(AxumMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(AxumMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    session_core.close();
}

pub struct WsConnector {
    rpc_core: Arc<RpcCore>,
    inactivity_timeout: Duration,
}

impl WsConnector {
    pub fn new(rpc_core: Arc<RpcCore>, inactivity_timeout: Duration) -> Self {
        WsConnector { rpc_core, inactivity_timeout }
    }
}

#[async_trait]
impl nprpc_core::Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn nprpc_core::Session>, CoreError> {
        let url = endpoint.format();
        let request = url
            .into_client_request()
            .map_err(|e| CoreError::ConnectionFailed(format!("invalid websocket url: {e}")))?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut source) = ws_stream.split();
        let (session_core, mut outbound_rx) = SessionCore::new(self.inactivity_timeout);
        let session_core = Arc::new(session_core);
        let streams = Arc::new(StreamManager::new());
        nprpc_streams::spawn_idle_reaper(&streams);

        let writer_task = tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                if sink.send(TungsteniteMessage::Binary(item.bytes.into())).await.is_err() {
                    break;
                }
            }
        });

        let reader_core = Arc::clone(&session_core);
        let reader_streams = Arc::clone(&streams);
        let reader_rpc_core = Arc::clone(&self.rpc_core);
        let reader_task = tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(TungsteniteMessage::Binary(bytes)) => {
                        match handle_inbound_frame_with_context(
                            &reader_rpc_core,
                            &reader_core,
                            &reader_streams,
                            bytes.to_vec(),
                            SessionContext::default(),
                        )
                        .await
                        {
                            IngressAction::Reply(reply, _context) => {
                                if reader_core.enqueue_outbound(reply).is_err() {
                                    break;
                                }
                            }
                            IngressAction::Consumed => {}
                        }
                    }
                    Ok(TungsteniteMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
                if reader_core.is_closed() {
                    break;
                }
            }
            reader_core.close();
        });

        Ok(Arc::new(WsSession { core: session_core, reader_task, writer_task }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use nprpc_core::{ActivationFlags, Connector, IdPolicy, Lifespan, ListenConfig, Poa, Servant};
    use nprpc_protocol::{MessageHeader, MessageKind, MessageType, HEADER_LEN};
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
            ws_port: Some(0),
            http_port: None,
            quic_port: None,
            udp_port: None,
            shared_memory_listener_uuid: None,
        }
    }

    #[tokio::test]
    async fn client_and_server_sessions_round_trip_a_function_call() {
        let rpc_core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let poa = rpc_core
            .register_poa(Poa::new("root", 0, Lifespan::Transient, IdPolicy::SystemGenerated, rpc_core.process_uuid))
            .unwrap();
        let object_id = poa
            .activate_object(Arc::new(Echo), ActivationFlags::ALLOW_WS, &empty_listen_config(), None)
            .unwrap();

        let app = Router::new().route("/rpc", get(ws_upgrade_handler)).with_state(Arc::clone(&rpc_core));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let connector = WsConnector::new(Arc::clone(&rpc_core), Duration::from_secs(30));
        let endpoint = Endpoint::parse(&format!("ws://{addr}/rpc")).unwrap();
        let client = connector.connect(&endpoint).await.unwrap();

        let mut body = 0u16.to_le_bytes().to_vec(); // poa_idx
        body.extend_from_slice(&object_id.object_id.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // function_idx
        body.extend_from_slice(b"ping");
        let header = MessageHeader {
            size: (HEADER_LEN + body.len()) as u32,
            kind: MessageKind::FunctionCall,
            msg_type: MessageType::Request,
            request_id: 0,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&body);

        let reply = client.send_receive(frame, Duration::from_secs(5)).await.unwrap();
        let reply_header = MessageHeader::decode(&reply).unwrap();
        assert_eq!(reply_header.kind, MessageKind::BlockResponse);
        assert_eq!(&reply[HEADER_LEN..], b"ping");
    }

    #[test]
    fn extract_cookie_context_parses_the_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "session=abc123; other=1".parse().unwrap());
        let ctx = extract_cookie_context(&headers);
        assert_eq!(ctx.cookies.get("session").map(String::as_str), Some("abc123"));
        assert!(ctx.set_cookies.is_empty());
    }

    #[test]
    fn extract_cookie_context_defaults_to_empty_without_a_cookie_header() {
        let ctx = extract_cookie_context(&HeaderMap::new());
        assert!(ctx.cookies.is_empty());
    }
}
