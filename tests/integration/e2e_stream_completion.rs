//! Drives a server-to-client stream across two real `TcpSession`s: the
//! server side writes chunks and a completion through its
//! `StreamManager`, the client side reads them back off its own,
//! checking the chunk/completion wire frames actually cross a socket in
//! order rather than just round-tripping through an in-memory registry.

use std::sync::Arc;
use std::time::Duration;

use nprpc_core::{RpcCore, Session};
use nprpc_streams::StreamEvent;
use nprpc_test_utils::{drain_stream_events, SessionStreamWriter};
use nprpc_transport::TcpSession;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

#[tokio::test]
async fn server_stream_delivers_chunks_then_completes() {
    let rpc_core = Arc::new(RpcCore::new(Uuid::new_v4()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_core = Arc::clone(&rpc_core);
    let accept_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        TcpSession::spawn(stream, accept_core, Duration::from_secs(30))
    });
    let client_stream = TcpStream::connect(addr).await.unwrap();
    let client_session = TcpSession::spawn(client_stream, Arc::clone(&rpc_core), Duration::from_secs(30));
    let server_session = accept_task.await.unwrap();

    let stream_id = 42;
    let reader = client_session.streams.register_reader(stream_id, true);

    let server_session_dyn: Arc<dyn Session> = server_session.clone();
    server_session
        .streams
        .register_stream(stream_id, Arc::new(SessionStreamWriter::new(server_session_dyn, stream_id)), false);

    server_session.streams.send_chunk(stream_id, b"first".to_vec()).await.unwrap();
    server_session.streams.send_chunk(stream_id, b"second".to_vec()).await.unwrap();
    server_session.streams.send_complete(stream_id).await.unwrap();

    let events = drain_stream_events(reader, Duration::from_secs(5)).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Chunk(b"first".to_vec()),
            StreamEvent::Chunk(b"second".to_vec()),
            StreamEvent::Completed,
        ]
    );
}
