//! A servant reads an incoming `Cookie` and sets a new one through
//! `nprpc_core::SESSION_CONTEXT`; this drives the whole HTTP request path
//! end to end over a real TCP socket, checking that the cookie plumbing
//! the `rpc_post_handler` carries actually reaches a `Set-Cookie` header.

use nprpc_core::{ActivationFlags, CoreError, MessageKind, Servant, SetCookie, SESSION_CONTEXT};
use nprpc_test_utils::{function_call, split_reply, TestNodeBuilder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Echoes the incoming `session` cookie's value as its reply body (or
/// `"none"` if absent), and always sets a fresh `session=issued` cookie.
struct CookieEchoServant;

impl Servant for CookieEchoServant {
    fn class_id(&self) -> &str {
        "CookieEcho"
    }

    fn dispatch(&self, _function_idx: u32, _params: &[u8]) -> Result<Vec<u8>, CoreError> {
        let incoming = SESSION_CONTEXT.with(|ctx| ctx.borrow().cookies.get("session").cloned());
        SESSION_CONTEXT.with(|ctx| {
            ctx.borrow_mut().set_cookies.push(SetCookie {
                name: "session".to_string(),
                value: "issued".to_string(),
                path: Some("/".to_string()),
                http_only: true,
                ..SetCookie::default()
            });
        });
        Ok(incoming.unwrap_or_else(|| "none".to_string()).into_bytes())
    }
}

fn split_http_response(response: &[u8]) -> (Vec<String>, &[u8]) {
    let split_at = response.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let head = std::str::from_utf8(&response[..split_at]).unwrap();
    let headers: Vec<String> = head.lines().skip(1).map(|l| l.to_string()).collect();
    (headers, &response[split_at..])
}

async fn post_rpc(addr: std::net::SocketAddr, body: Vec<u8>, cookie_header: Option<&str>) -> (Vec<String>, Vec<u8>) {
    let mut request = format!(
        "POST /rpc HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    if let Some(cookie) = cookie_header {
        request.push_str(&format!("Cookie: {cookie}\r\n"));
    }
    request.push_str("\r\n");
    let mut request = request.into_bytes();
    request.extend_from_slice(&body);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let (headers, body) = split_http_response(&response);
    (headers, body.to_vec())
}

#[tokio::test]
async fn rpc_post_sets_and_reads_cookies_round_trip() {
    let node = TestNodeBuilder::new().with_http().build().await;
    let object_id = node.activate(CookieEchoServant, ActivationFlags::ALLOW_HTTP);
    let addr = node.http_addr();

    let body = function_call(&object_id, 0, b"");
    let (headers, reply_body) = post_rpc(addr, body.clone(), None).await;

    assert!(headers.iter().any(|h| h.to_ascii_lowercase().starts_with("set-cookie: session=issued")));
    let (kind, reply) = split_reply(&reply_body);
    assert_eq!(kind, MessageKind::BlockResponse);
    assert_eq!(reply, b"none");

    let (_headers, reply_body) = post_rpc(addr, body, Some("session=abc123")).await;
    let (kind, reply) = split_reply(&reply_body);
    assert_eq!(kind, MessageKind::BlockResponse);
    assert_eq!(reply, b"abc123");
}

