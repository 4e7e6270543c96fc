//! A raw UDP "server" drops the first two deliveries of a reliable call
//! before finally replying, proving the client's `[reliable]` retransmit
//! timer (500ms, up to 3 retries) is what gets the reply through rather
//! than a lucky single send.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nprpc_core::{MessageHeader, MessageKind, MessageType, RpcCore};
use nprpc_test_utils::function_call_raw;
use tokio::net::UdpSocket;
use uuid::Uuid;

#[tokio::test]
async fn client_retransmits_until_the_flaky_server_finally_answers() {
    let rpc_core = Arc::new(RpcCore::new(Uuid::new_v4()));
    nprpc_transport::register_default_connectors(&rpc_core, Duration::from_secs(30));

    let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server_socket.local_addr().unwrap();
    let deliveries = Arc::new(AtomicUsize::new(0));
    let deliveries_for_server = Arc::clone(&deliveries);

    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, peer): (usize, SocketAddr) = server_socket.recv_from(&mut buf).await.unwrap();
            let count = deliveries_for_server.fetch_add(1, Ordering::SeqCst) + 1;
            if count < 3 {
                continue; // drop the first two deliveries, forcing a retransmit
            }
            let frame = buf[..len].to_vec();
            let header = MessageHeader::decode(&frame).unwrap();
            let reply = MessageHeader::simple_answer(MessageKind::Success, header.request_id).encode().to_vec();
            server_socket.send_to(&reply, peer).await.unwrap();
            break;
        }
    });

    let url = format!("udp://127.0.0.1:{}", server_addr.port());
    let request = function_call_raw(0, 0, 0, b"ping");

    let started = Instant::now();
    let reply = rpc_core.call(&url, request, Duration::from_secs(5)).await.unwrap();
    let elapsed = started.elapsed();

    let header = MessageHeader::decode(&reply).unwrap();
    assert_eq!(header.kind, MessageKind::Success);
    assert_eq!(header.msg_type, MessageType::Answer);
    assert_eq!(deliveries.load(Ordering::SeqCst), 3);
    // Two retransmits at the 500ms interval must have elapsed before the
    // third delivery got through.
    assert!(elapsed >= Duration::from_millis(900), "elapsed was {elapsed:?}");
}
