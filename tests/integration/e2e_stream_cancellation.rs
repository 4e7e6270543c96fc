//! Exercises cancelling a stream from both ends over two real
//! `TcpSession`s: a writer-side cancel notifies its transport and tears
//! down the writer entry, and a reader that never sees a cancel frame
//! but is told locally to stop still resolves with `Cancelled`.

use std::sync::Arc;
use std::time::Duration;

use nprpc_core::{RpcCore, Session};
use nprpc_streams::StreamEvent;
use nprpc_test_utils::{drain_stream_events, SessionStreamWriter};
use nprpc_transport::TcpSession;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

async fn connect_pair() -> (Arc<TcpSession>, Arc<TcpSession>) {
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
    (client_session, server_session)
}

#[tokio::test]
async fn writer_side_cancel_notifies_the_peer_reader() {
    let (client_session, server_session) = connect_pair().await;

    let stream_id = 7;
    let reader = client_session.streams.register_reader(stream_id, true);

    let server_session_dyn: Arc<dyn Session> = server_session.clone();
    server_session
        .streams
        .register_stream(stream_id, Arc::new(SessionStreamWriter::new(server_session_dyn, stream_id)), false);

    server_session.streams.send_chunk(stream_id, b"partial".to_vec()).await.unwrap();
    server_session.streams.send_cancel(stream_id).await.unwrap();

    let events = drain_stream_events(reader, Duration::from_secs(5)).await;
    assert_eq!(events, vec![StreamEvent::Chunk(b"partial".to_vec()), StreamEvent::Cancelled]);
}

#[tokio::test]
async fn cancelling_a_stream_we_are_reading_removes_it_locally() {
    let (client_session, _server_session) = connect_pair().await;

    let stream_id = 11;
    let _reader = client_session.streams.register_reader(stream_id, true);
    assert!(client_session.streams.has_reader(stream_id));

    client_session.streams.send_cancel(stream_id).await.unwrap();
    assert!(!client_session.streams.has_reader(stream_id));
}
