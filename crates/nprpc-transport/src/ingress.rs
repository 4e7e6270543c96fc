//! Shared inbound-frame triage used by every socket-based transport:
//! replies resolve a pending call, streaming frames route into the
//! session's [`StreamManager`], everything else goes through the generic
//! [`crate::dispatch::dispatch_inbound`] call path.

use std::sync::Arc;

use nprpc_core::{MessageHeader, MessageType, RpcCore, SessionContext, SessionCore};
use nprpc_streams::StreamManager;

use crate::dispatch::dispatch_inbound;
use crate::stream_wire::dispatch_stream_frame;

pub enum IngressAction {
    /// Write this frame back on the same connection. The accompanying
    /// context is the one left behind after dispatch — HTTP reads its
    /// `set_cookies` back off of this to emit response headers.
    Reply(Vec<u8>, SessionContext),
    /// Nothing more to do — the frame resolved a pending call or fed the
    /// stream manager.
    Consumed,
}

fn is_streaming_kind(kind: nprpc_core::MessageKind) -> bool {
    use nprpc_core::MessageKind::*;
    matches!(kind, StreamInit | StreamDataChunk | StreamCompletion | StreamError | StreamCancellation)
}

pub async fn handle_inbound_frame(
    core: &Arc<RpcCore>,
    session_core: &Arc<SessionCore>,
    streams: &Arc<StreamManager>,
    frame: Vec<u8>,
) -> IngressAction {
    handle_inbound_frame_with_context(core, session_core, streams, frame, SessionContext::default()).await
}

/// As [`handle_inbound_frame`], but with an explicit context — used by
/// the WebSocket and HTTP drivers, which capture request cookies the
/// plain TCP driver never has.
pub async fn handle_inbound_frame_with_context(
    core: &Arc<RpcCore>,
    session_core: &Arc<SessionCore>,
    streams: &Arc<StreamManager>,
    frame: Vec<u8>,
    context: SessionContext,
) -> IngressAction {
    session_core.touch();

    let header = match MessageHeader::decode(&frame) {
        Ok(h) => h,
        Err(_) => return IngressAction::Consumed,
    };

    if header.msg_type == MessageType::Answer {
        session_core.resolve(header.request_id, Ok(frame));
        return IngressAction::Consumed;
    }

    if is_streaming_kind(header.kind) {
        dispatch_stream_frame(streams, header.kind, &frame[nprpc_core::HEADER_LEN..]);
        return IngressAction::Consumed;
    }

    let (reply, context) = dispatch_inbound(core, &frame, context).await;
    IngressAction::Reply(reply, context)
}
