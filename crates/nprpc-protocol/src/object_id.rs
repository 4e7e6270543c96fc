//! `ObjectId` and its IOR (Interoperable Object Reference) string
//! serialization for passing references across processes.

use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;

pub const IOR_PREFIX: &str = "NPRPC1:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectId {
    pub object_id: u64,
    pub poa_idx: u16,
    pub flags: u16,
    pub origin: Uuid,
    pub class_id: String,
    /// Semicolon-separated, ordered preferred-to-fallback.
    pub urls: Vec<String>,
}

impl ObjectId {
    pub fn encode(&self) -> Vec<u8> {
        let urls_joined = self.urls.join(";");
        let class_bytes = self.class_id.as_bytes();
        let urls_bytes = urls_joined.as_bytes();

        let mut buf = Vec::with_capacity(8 + 2 + 2 + 16 + 4 + class_bytes.len() + 4 + urls_bytes.len());
        buf.extend_from_slice(&self.object_id.to_le_bytes());
        buf.extend_from_slice(&self.poa_idx.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(self.origin.as_bytes());
        buf.extend_from_slice(&(class_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(class_bytes);
        buf.extend_from_slice(&(urls_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(urls_bytes);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0usize;
        let take = |cursor: &mut usize, n: usize, bytes: &[u8]| -> Result<std::ops::Range<usize>, ProtocolError> {
            let end = *cursor + n;
            if end > bytes.len() {
                return Err(ProtocolError::BadInput("ObjectId buffer truncated".to_string()));
            }
            let range = *cursor..end;
            *cursor = end;
            Ok(range)
        };

        let object_id = u64::from_le_bytes(bytes[take(&mut cursor, 8, bytes)?].try_into().unwrap());
        let poa_idx = u16::from_le_bytes(bytes[take(&mut cursor, 2, bytes)?].try_into().unwrap());
        let flags = u16::from_le_bytes(bytes[take(&mut cursor, 2, bytes)?].try_into().unwrap());
        let origin = Uuid::from_bytes(bytes[take(&mut cursor, 16, bytes)?].try_into().unwrap());

        let class_len = u32::from_le_bytes(bytes[take(&mut cursor, 4, bytes)?].try_into().unwrap()) as usize;
        let class_id = String::from_utf8(bytes[take(&mut cursor, class_len, bytes)?].to_vec())
            .map_err(|_| ProtocolError::BadInput("class_id is not valid UTF-8".to_string()))?;

        let urls_len = u32::from_le_bytes(bytes[take(&mut cursor, 4, bytes)?].try_into().unwrap()) as usize;
        let urls_joined = String::from_utf8(bytes[take(&mut cursor, urls_len, bytes)?].to_vec())
            .map_err(|_| ProtocolError::BadInput("urls are not valid UTF-8".to_string()))?;
        let urls = if urls_joined.is_empty() {
            Vec::new()
        } else {
            urls_joined.split(';').map(str::to_string).collect()
        };

        Ok(ObjectId {
            object_id,
            poa_idx,
            flags,
            origin,
            class_id,
            urls,
        })
    }

    pub fn to_ior(&self) -> String {
        format!("{IOR_PREFIX}{}", BASE64.encode(self.encode()))
    }

    pub fn from_ior(ior: &str) -> Result<Self, ProtocolError> {
        let encoded = ior
            .strip_prefix(IOR_PREFIX)
            .ok_or_else(|| ProtocolError::BadInput(format!("IOR missing {IOR_PREFIX} prefix")))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ProtocolError::BadInput(format!("IOR base64 decode failed: {e}")))?;
        Self::decode(&bytes)
    }

    /// Whether a shared-memory URL should be preferred: the reading
    /// process's identity equals the object's origin.
    pub fn prefers_shared_memory(&self, reader_uuid: Uuid) -> bool {
        self.origin == reader_uuid && self.urls.iter().any(|u| u.starts_with("mem://"))
    }
}

/// Picks which of `object_id.urls` a caller identified by `local_uuid`
/// should dial. An explicit `hint` wins if it names one of the object's
/// own URLs; otherwise a same-process `mem://` URL is preferred over the
/// network, and failing that the first URL in the list is used (the
/// order the object's POA listed its listeners in, preferred to
/// fallback). Reachability of the chosen URL is not checked here — a
/// failed connect is surfaced lazily by the caller's own connect attempt.
pub fn select_endpoint<'a>(object_id: &'a ObjectId, local_uuid: Uuid, hint: Option<&str>) -> Option<&'a str> {
    if let Some(hint) = hint {
        if let Some(matched) = object_id.urls.iter().find(|u| u.as_str() == hint) {
            return Some(matched.as_str());
        }
    }
    if object_id.prefers_shared_memory(local_uuid) {
        if let Some(mem_url) = object_id.urls.iter().find(|u| u.starts_with("mem://")) {
            return Some(mem_url.as_str());
        }
    }
    object_id
        .urls
        .iter()
        .find(|u| !u.starts_with("mem://"))
        .or_else(|| object_id.urls.first())
        .map(String::as_str)
}
