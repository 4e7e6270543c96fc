//! The fixed-size message header every NPRPC frame begins with, and the
//! wire vocabulary of message kinds.

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    FunctionCall = 0,
    BlockResponse = 1,
    AddReference = 2,
    ReleaseObject = 3,
    Success = 4,
    Exception = 5,
    ErrorPoaNotExist = 6,
    ErrorObjectNotExist = 7,
    ErrorCommFailure = 8,
    ErrorUnknownFunctionIdx = 9,
    ErrorUnknownMessageId = 10,
    ErrorBadAccess = 11,
    ErrorBadInput = 12,
    StreamInit = 13,
    StreamDataChunk = 14,
    StreamCompletion = 15,
    StreamError = 16,
    StreamCancellation = 17,
}

impl MessageKind {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            MessageKind::ErrorPoaNotExist
                | MessageKind::ErrorObjectNotExist
                | MessageKind::ErrorCommFailure
                | MessageKind::ErrorUnknownFunctionIdx
                | MessageKind::ErrorUnknownMessageId
                | MessageKind::ErrorBadAccess
                | MessageKind::ErrorBadInput
        )
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use MessageKind::*;
        Ok(match value {
            0 => FunctionCall,
            1 => BlockResponse,
            2 => AddReference,
            3 => ReleaseObject,
            4 => Success,
            5 => Exception,
            6 => ErrorPoaNotExist,
            7 => ErrorObjectNotExist,
            8 => ErrorCommFailure,
            9 => ErrorUnknownFunctionIdx,
            10 => ErrorUnknownMessageId,
            11 => ErrorBadAccess,
            12 => ErrorBadInput,
            13 => StreamInit,
            14 => StreamDataChunk,
            15 => StreamCompletion,
            16 => StreamError,
            17 => StreamCancellation,
            other => return Err(ProtocolError::BadInput(format!("unknown message kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Request = 0,
    Answer = 1,
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Answer),
            other => Err(ProtocolError::BadInput(format!("unknown message type {other}"))),
        }
    }
}

/// The 16-byte header every message starts with: `size` excludes itself and
/// counts only the body that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub size: u32,
    pub kind: MessageKind,
    pub msg_type: MessageType,
    pub request_id: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&(self.kind as u32).to_le_bytes());
        buf[8..12].copy_from_slice(&(self.msg_type as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.request_id.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::BadInput(format!(
                "header requires {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let size = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let kind = MessageKind::try_from(u32::from_le_bytes(bytes[4..8].try_into().unwrap()))?;
        let msg_type = MessageType::try_from(u32::from_le_bytes(bytes[8..12].try_into().unwrap()))?;
        let request_id = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        Ok(MessageHeader {
            size,
            kind,
            msg_type,
            request_id,
        })
    }

    /// The canonical helper for header-only replies: `Success`, any
    /// `Error_*`, or a plain acknowledgment.
    pub fn simple_answer(kind: MessageKind, request_id: u32) -> Self {
        MessageHeader {
            size: 0,
            kind,
            msg_type: MessageType::Answer,
            request_id,
        }
    }
}
