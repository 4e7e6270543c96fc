//! `RpcCore::evict_session` closes the pooled session for a URL and
//! forgets it, so the next `get_session`/`call` for that URL establishes
//! a fresh connection rather than reusing the closed one.

use std::sync::Arc;
use std::time::Duration;

use nprpc_core::{ActivationFlags, MessageKind};
use nprpc_test_utils::{function_call, split_reply, EchoServant, TestNodeBuilder};

#[tokio::test]
async fn evicting_a_session_forces_a_fresh_connection_on_next_use() {
    let node = TestNodeBuilder::new().with_tcp().build().await;
    node.register_default_connectors();
    let object_id = node.activate(EchoServant, ActivationFlags::ALLOW_TCP);
    let url = format!("tcp://{}", node.tcp_addr());

    let first = node.rpc_core.get_session(&url).await.unwrap();
    assert!(!first.is_closed());

    node.rpc_core.evict_session(&url);
    assert!(first.is_closed());

    let second = node.rpc_core.get_session(&url).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_closed());

    let reply = node
        .rpc_core
        .call(&url, function_call(&object_id, 0, b"still works"), Duration::from_secs(5))
        .await
        .unwrap();
    let (kind, body) = split_reply(&reply);
    assert_eq!(kind, MessageKind::BlockResponse);
    assert_eq!(body, b"still works");
}

#[tokio::test]
async fn evicting_an_unknown_url_is_a_no_op() {
    let node = TestNodeBuilder::new().with_tcp().build().await;
    node.rpc_core.evict_session("tcp://127.0.0.1:1");
}
