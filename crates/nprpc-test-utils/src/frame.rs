//! Builders for the raw wire frames the integration suite sends by hand,
//! mirroring the `FunctionCall` body layout every transport driver's own
//! `#[cfg(test)]` module already assembles inline
//! (`poa_idx` u16 LE + `object_id` u64 LE + `function_idx` u32 LE + params).

use nprpc_core::{MessageHeader, MessageKind, MessageType, ObjectId, HEADER_LEN};

/// Encodes a `FunctionCall` request frame against `object_id` for
/// `function_idx`, carrying `params` as the opaque body tail.
pub fn function_call(object_id: &ObjectId, function_idx: u32, params: &[u8]) -> Vec<u8> {
    function_call_raw(object_id.poa_idx, object_id.object_id, function_idx, params)
}

/// As [`function_call`], but takes the `poa_idx`/`object_id` pair
/// directly — useful for exercising `PoaNotExist`/`ObjectNotExist` with
/// ids that were never activated.
pub fn function_call_raw(poa_idx: u16, object_id: u64, function_idx: u32, params: &[u8]) -> Vec<u8> {
    let mut body = poa_idx.to_le_bytes().to_vec();
    body.extend_from_slice(&object_id.to_le_bytes());
    body.extend_from_slice(&function_idx.to_le_bytes());
    body.extend_from_slice(params);

    let header = MessageHeader {
        size: (HEADER_LEN + body.len()) as u32,
        kind: MessageKind::FunctionCall,
        msg_type: MessageType::Request,
        request_id: 0,
    };
    let mut frame = header.encode();
    frame.extend_from_slice(&body);
    frame
}

/// Strips the header off a reply frame, returning `(kind, body)`.
pub fn split_reply(frame: &[u8]) -> (MessageKind, &[u8]) {
    let header = MessageHeader::decode(frame).expect("reply frame has a valid header");
    (header.kind, &frame[HEADER_LEN..])
}
