//! HTTP Request Path (spec.md §4.J): a per-request session is a thin
//! session that cannot issue outbound calls. It wraps the POST body as
//! an rx buffer, runs it through the generic dispatch path, and
//! serializes the reply into the response body. Cookies go in via the
//! `Cookie` header and out via `Set-Cookie`; cross-origin requests get
//! an echoed `Access-Control-Allow-Origin` plus
//! `Access-Control-Allow-Credentials: true`, matching `services/server`'s
//! router-level CORS layer but scoped per-response since the echoed
//! origin is request-dependent.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::dispatch::dispatch_inbound;

/// Delegated static-file serving; out of scope per spec.md §1, so only
/// the seam is implemented. A no-op default means "no static content
/// configured" rather than an error.
pub trait StaticContentProvider: Send + Sync {
    fn serve(&self, path: &str) -> Option<(Vec<u8>, &'static str)> {
        let _ = path;
        None
    }
}

/// Delegated server-side-render bridge; out of scope per spec.md §1.
pub trait SsrForwarder: Send + Sync {
    fn forward(&self, path: &str) -> Option<Vec<u8>> {
        let _ = path;
        None
    }
}

pub struct NoopStaticContentProvider;
impl StaticContentProvider for NoopStaticContentProvider {}

pub struct NoopSsrForwarder;
impl SsrForwarder for NoopSsrForwarder {}

fn cors_headers(headers: &HeaderMap) -> Option<(HeaderValue, HeaderValue)> {
    let origin = headers.get("origin")?.clone();
    Some((origin, HeaderValue::from_static("true")))
}

/// `POST /rpc`: the RPC triage endpoint. Static/SSR requests are routed
/// by the caller's own router configuration before reaching this
/// handler — this function only ever sees RPC frames.
pub async fn rpc_post_handler(State(rpc_core): State<Arc<nprpc_core::RpcCore>>, headers: HeaderMap, body: Bytes) -> Response {
    let cookies = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .map(nprpc_core::SessionContext::parse_cookie_header)
        .unwrap_or_default();
    let context = nprpc_core::SessionContext { cookies, set_cookies: Vec::new() };

    let (reply, context) = dispatch_inbound(&rpc_core, &body, context).await;

    let mut response = (StatusCode::OK, Bytes::from(reply)).into_response();
    for cookie in &context.set_cookies {
        if let Ok(value) = HeaderValue::from_str(&cookie.to_header_value()) {
            response.headers_mut().append(axum::http::header::SET_COOKIE, value);
        }
    }
    if let Some((origin, credentials)) = cors_headers(&headers) {
        response.headers_mut().insert(axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        response
            .headers_mut()
            .insert(axum::http::header::ACCESS_CONTROL_ALLOW_CREDENTIALS, credentials);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use nprpc_core::{ActivationFlags, IdPolicy, Lifespan, ListenConfig, Poa, RpcCore, Servant};
    use nprpc_protocol::HEADER_LEN;
    use uuid::Uuid;

    struct Echo;
    impl Servant for Echo {
        fn class_id(&self) -> &str {
            "Echo"
        }
        fn dispatch(&self, _function_idx: u32, params: &[u8]) -> Result<Vec<u8>, nprpc_core::CoreError> {
            Ok(params.to_vec())
        }
    }

    fn empty_listen_config() -> ListenConfig {
        ListenConfig {
            hostname: "localhost".to_string(),
            tcp_port: None,
            ws_port: None,
            http_port: Some(8080),
            quic_port: None,
            udp_port: None,
            shared_memory_listener_uuid: None,
        }
    }

    #[tokio::test]
    async fn rpc_post_handler_dispatches_and_echoes_cors_origin() {
        let core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let poa = core
            .register_poa(Poa::new("root", 0, Lifespan::Transient, IdPolicy::SystemGenerated, core.process_uuid))
            .unwrap();
        let object_id = poa
            .activate_object(Arc::new(Echo), ActivationFlags::ALLOW_HTTP, &empty_listen_config(), None)
            .unwrap();

        let mut body = 0u16.to_le_bytes().to_vec();
        body.extend_from_slice(&object_id.object_id.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(b"hi");
        let header = nprpc_protocol::MessageHeader {
            size: (HEADER_LEN + body.len()) as u32,
            kind: nprpc_protocol::MessageKind::FunctionCall,
            msg_type: nprpc_protocol::MessageType::Request,
            request_id: 1,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&body);

        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static("https://example.com"));
        let response = rpc_post_handler(State(core), headers, Bytes::from(frame)).await;

        assert_eq!(
            response.headers().get(axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
        assert_eq!(
            response.headers().get(axum::http::header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }
}
