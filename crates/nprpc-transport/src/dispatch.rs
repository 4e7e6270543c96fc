//! Server-ingress dispatch shared by every transport driver: decode a
//! `FunctionCall` frame, look up the target object, invoke its servant,
//! and encode the reply frame. Grounded on spec.md §4.G's "Dispatch
//! (server ingress)" steps, which describe one procedure reused
//! regardless of which transport carried the bytes in.
//!
//! `FunctionCall` body layout (this crate's own wire decision, since the
//! spec leaves the exact byte layout to the code generator): `poa_idx`
//! (u16 LE), `object_id` (u64 LE), `function_idx` (u32 LE), then the
//! remaining bytes are opaque params handed to `Servant::dispatch`.
//! `AddReference`/`ReleaseObject` share the same `poa_idx` + `object_id`
//! prefix but carry no `function_idx` or params — they only identify the
//! object whose count to bump or drop.
use std::sync::Arc;

use nprpc_core::{CoreError, MessageHeader, MessageKind, MessageType, RpcCore, SessionContext, HEADER_LEN};
use tracing::warn;

fn simple_reply(kind: MessageKind, request_id: u32) -> Vec<u8> {
    nprpc_core::make_simple_answer(kind, request_id)
}

fn block_response(request_id: u32, result: Vec<u8>) -> Vec<u8> {
    let header = MessageHeader {
        size: (HEADER_LEN + result.len()) as u32,
        kind: MessageKind::BlockResponse,
        msg_type: MessageType::Answer,
        request_id,
    };
    let mut out = header.encode();
    out.extend_from_slice(&result);
    out
}

fn error_kind_for(error: &CoreError) -> MessageKind {
    match error {
        CoreError::PoaNotExist => MessageKind::ErrorPoaNotExist,
        CoreError::ObjectNotExist => MessageKind::ErrorObjectNotExist,
        CoreError::UnknownFunctionIdx(_) => MessageKind::ErrorUnknownFunctionIdx,
        CoreError::UnknownMessageId => MessageKind::ErrorUnknownMessageId,
        CoreError::BadAccess(_) => MessageKind::ErrorBadAccess,
        CoreError::BadInput(_) => MessageKind::ErrorBadInput,
        _ => MessageKind::ErrorCommFailure,
    }
}

/// Decode and dispatch one inbound frame against `core`, running the
/// servant invocation inside a fresh [`SessionContext`] scope so cookie
/// plumbing is available to it. Returns the encoded reply frame plus the
/// context as it stood after dispatch — callers that bridge to HTTP read
/// `set_cookies` off of it to emit `Set-Cookie` response headers.
pub async fn dispatch_inbound(core: &Arc<RpcCore>, frame: &[u8], context: SessionContext) -> (Vec<u8>, SessionContext) {
    let header = match MessageHeader::decode(frame) {
        Ok(h) => h,
        Err(_) => return (simple_reply(MessageKind::ErrorBadInput, 0), context),
    };
    let body = &frame[HEADER_LEN..];

    match header.kind {
        MessageKind::FunctionCall => {
            nprpc_core::SESSION_CONTEXT
                .scope(std::cell::RefCell::new(context), async {
                    let reply = dispatch_function_call(core, &header, body).await;
                    let context = nprpc_core::SESSION_CONTEXT.with(|ctx| ctx.borrow().clone());
                    (reply, context)
                })
                .await
        }
        MessageKind::AddReference => (dispatch_reference_count(core, &header, body, true), context),
        MessageKind::ReleaseObject => (dispatch_reference_count(core, &header, body, false), context),
        MessageKind::StreamCancellation
        | MessageKind::StreamDataChunk
        | MessageKind::StreamCompletion
        | MessageKind::StreamError
        | MessageKind::StreamInit => {
            // Streaming control frames are routed by the session's own
            // ingress loop straight to its `StreamManager`, never through
            // this generic dispatcher; seeing one here means the caller
            // forgot to intercept it first.
            warn!(kind = ?header.kind, "streaming frame reached the generic dispatcher");
            (simple_reply(MessageKind::ErrorUnknownMessageId, header.request_id), context)
        }
        _ => (simple_reply(MessageKind::ErrorUnknownMessageId, header.request_id), context),
    }
}

fn dispatch_reference_count(core: &Arc<RpcCore>, header: &MessageHeader, body: &[u8], add: bool) -> Vec<u8> {
    if body.len() < 10 {
        return simple_reply(MessageKind::ErrorBadInput, header.request_id);
    }
    let poa_idx = u16::from_le_bytes(body[0..2].try_into().unwrap());
    let object_id = u64::from_le_bytes(body[2..10].try_into().unwrap());

    let result = if add { core.add_reference(poa_idx, object_id) } else { core.release_object(poa_idx, object_id) };
    match result {
        Ok(()) => simple_reply(MessageKind::Success, header.request_id),
        Err(error) => simple_reply(error_kind_for(&error), header.request_id),
    }
}

async fn dispatch_function_call(core: &Arc<RpcCore>, header: &MessageHeader, body: &[u8]) -> Vec<u8> {
    if body.len() < 14 {
        return simple_reply(MessageKind::ErrorBadInput, header.request_id);
    }
    let poa_idx = u16::from_le_bytes(body[0..2].try_into().unwrap());
    let object_id = u64::from_le_bytes(body[2..10].try_into().unwrap());
    let function_idx = u32::from_le_bytes(body[10..14].try_into().unwrap());
    let params = body[14..].to_vec();

    match core.dispatch(poa_idx, object_id, function_idx, &params) {
        Ok(result) => block_response(header.request_id, result),
        Err(error) => simple_reply(error_kind_for(&error), header.request_id),
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
        fn dispatch(&self, function_idx: u32, params: &[u8]) -> Result<Vec<u8>, CoreError> {
            if function_idx != 0 {
                return Err(CoreError::UnknownFunctionIdx(function_idx));
            }
            Ok(params.to_vec())
        }
    }

    fn empty_listen_config() -> ListenConfig {
        ListenConfig {
            hostname: "localhost".to_string(),
            tcp_port: None,
            ws_port: None,
            http_port: None,
            quic_port: None,
            udp_port: None,
            shared_memory_listener_uuid: None,
        }
    }

    fn function_call_frame(request_id: u32, poa_idx: u16, object_id: u64, function_idx: u32, params: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&poa_idx.to_le_bytes());
        body.extend_from_slice(&object_id.to_le_bytes());
        body.extend_from_slice(&function_idx.to_le_bytes());
        body.extend_from_slice(params);
        let header = MessageHeader {
            size: (HEADER_LEN + body.len()) as u32,
            kind: MessageKind::FunctionCall,
            msg_type: MessageType::Request,
            request_id,
        };
        let mut out = header.encode();
        out.extend_from_slice(&body);
        out
    }

    #[tokio::test]
    async fn dispatches_a_function_call_to_its_servant_and_encodes_block_response() {
        let core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let poa = core
            .register_poa(Poa::new("test", 0, Lifespan::Transient, IdPolicy::SystemGenerated, core.process_uuid))
            .unwrap();
        let object_id = poa
            .activate_object(Arc::new(Echo), ActivationFlags::ALLOW_TCP, &empty_listen_config(), None)
            .unwrap();

        let frame = function_call_frame(7, 0, object_id.object_id, 0, b"payload");
        let (reply, _context) = dispatch_inbound(&core, &frame, SessionContext::default()).await;

        let reply_header = MessageHeader::decode(&reply).unwrap();
        assert_eq!(reply_header.kind, MessageKind::BlockResponse);
        assert_eq!(reply_header.request_id, 7);
        assert_eq!(&reply[HEADER_LEN..], b"payload");
    }

    #[tokio::test]
    async fn unknown_poa_yields_poa_not_exist_error() {
        let core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let frame = function_call_frame(1, 3, 0, 0, b"");
        let (reply, _context) = dispatch_inbound(&core, &frame, SessionContext::default()).await;
        let reply_header = MessageHeader::decode(&reply).unwrap();
        assert_eq!(reply_header.kind, MessageKind::ErrorPoaNotExist);
    }

    fn reference_count_frame(request_id: u32, kind: MessageKind, poa_idx: u16, object_id: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&poa_idx.to_le_bytes());
        body.extend_from_slice(&object_id.to_le_bytes());
        let header = MessageHeader {
            size: (HEADER_LEN + body.len()) as u32,
            kind,
            msg_type: MessageType::Request,
            request_id,
        };
        let mut out = header.encode();
        out.extend_from_slice(&body);
        out
    }

    #[tokio::test]
    async fn release_object_drops_a_persistent_object_once_its_refcount_hits_zero() {
        let core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let poa = core
            .register_poa(Poa::new("test", 0, Lifespan::Persistent, IdPolicy::UserSupplied, core.process_uuid))
            .unwrap();
        let object_id = poa
            .activate_object(Arc::new(Echo), ActivationFlags::ALLOW_TCP, &empty_listen_config(), Some(1))
            .unwrap();

        let add_frame = reference_count_frame(1, MessageKind::AddReference, 0, object_id.object_id);
        let (reply, _) = dispatch_inbound(&core, &add_frame, SessionContext::default()).await;
        assert_eq!(MessageHeader::decode(&reply).unwrap().kind, MessageKind::Success);

        // refcount is now 2; the first release should not destroy it yet.
        let release_frame = reference_count_frame(2, MessageKind::ReleaseObject, 0, object_id.object_id);
        let (reply, _) = dispatch_inbound(&core, &release_frame, SessionContext::default()).await;
        assert_eq!(MessageHeader::decode(&reply).unwrap().kind, MessageKind::Success);
        let still_there = function_call_frame(3, 0, object_id.object_id, 0, b"x");
        let (reply, _) = dispatch_inbound(&core, &still_there, SessionContext::default()).await;
        assert_eq!(MessageHeader::decode(&reply).unwrap().kind, MessageKind::BlockResponse);

        // Second release hits zero and tears the object down.
        let (reply, _) = dispatch_inbound(&core, &release_frame, SessionContext::default()).await;
        assert_eq!(MessageHeader::decode(&reply).unwrap().kind, MessageKind::Success);
        let gone = function_call_frame(4, 0, object_id.object_id, 0, b"x");
        let (reply, _) = dispatch_inbound(&core, &gone, SessionContext::default()).await;
        assert_eq!(MessageHeader::decode(&reply).unwrap().kind, MessageKind::ErrorObjectNotExist);
    }

    #[tokio::test]
    async fn release_object_on_an_unknown_id_reports_object_not_exist() {
        let core = Arc::new(RpcCore::new(Uuid::new_v4()));
        core.register_poa(Poa::new("test", 0, Lifespan::Persistent, IdPolicy::UserSupplied, core.process_uuid))
            .unwrap();
        let frame = reference_count_frame(1, MessageKind::ReleaseObject, 0, 999);
        let (reply, _) = dispatch_inbound(&core, &frame, SessionContext::default()).await;
        assert_eq!(MessageHeader::decode(&reply).unwrap().kind, MessageKind::ErrorObjectNotExist);
    }
}
