//! A client dials a node's shared-memory listener and round-trips a
//! function call through the zero-copy ring transport end to end,
//! exercising the handshake, channel establishment, and dispatch path
//! together rather than any one of them in isolation.

use std::time::Duration;

use nprpc_core::{ActivationFlags, MessageKind};
use nprpc_test_utils::{connect_shared_memory, function_call, split_reply, EchoServant, TestNodeBuilder};

#[tokio::test]
async fn shared_memory_client_echoes_a_function_call() {
    let node = TestNodeBuilder::new().with_shared_memory().build().await;
    let object_id = node.activate(EchoServant, ActivationFlags::ALLOW_SHARED_MEMORY);

    let session = connect_shared_memory(std::sync::Arc::clone(&node.rpc_core), node.shm_listener_uuid(), Duration::from_secs(10)).await;

    let request = function_call(&object_id, 0, b"zero-copy hello");
    let reply = session.send_receive(request, Duration::from_secs(5)).await.unwrap();

    let (kind, body) = split_reply(&reply);
    assert_eq!(kind, MessageKind::BlockResponse);
    assert_eq!(body, b"zero-copy hello");
}

#[tokio::test]
async fn shared_memory_session_reports_unknown_function_idx() {
    let node = TestNodeBuilder::new().with_shared_memory().build().await;
    let object_id = node.activate(EchoServant, ActivationFlags::ALLOW_SHARED_MEMORY);

    let session = connect_shared_memory(std::sync::Arc::clone(&node.rpc_core), node.shm_listener_uuid(), Duration::from_secs(10)).await;

    let request = function_call(&object_id, 7, b"unused");
    let reply = session.send_receive(request, Duration::from_secs(5)).await.unwrap();

    let (kind, _body) = split_reply(&reply);
    assert_eq!(kind, MessageKind::ErrorUnknownFunctionIdx);
}
