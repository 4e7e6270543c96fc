//! The process-wide singleton tying together the POA registry, the
//! session pool, and the reply-handling helpers every dispatch path
//! shares.

use crate::error::CoreError;
use crate::poa::Poa;
use crate::session::{Completion, Session};
use async_trait::async_trait;
use nprpc_protocol::{select_endpoint, Endpoint, MessageHeader, MessageKind, ObjectId, HEADER_LEN};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Small fixed pool of POAs per process, addressed directly by index.
pub const MAX_POAS: usize = 6;

/// Establishes a new `Session` for an endpoint this process doesn't
/// already have an open connection to. One connector is registered per
/// URL scheme (`nprpc-transport` supplies the concrete implementations).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Session>, CoreError>;
}

pub struct RpcCore {
    pub process_uuid: Uuid,
    poas: Mutex<Vec<Option<Arc<Poa>>>>,
    sessions: Mutex<HashMap<String, Arc<dyn Session>>>,
    /// One per-URL async mutex, created on demand, so concurrent
    /// `get_session` calls for the same not-yet-connected endpoint
    /// serialize on `connect` instead of racing to insert duplicate
    /// sessions.
    connect_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    connectors: Mutex<HashMap<&'static str, Arc<dyn Connector>>>,
}

impl RpcCore {
    pub fn new(process_uuid: Uuid) -> Self {
        RpcCore {
            process_uuid,
            poas: Mutex::new(vec![None; MAX_POAS]),
            sessions: Mutex::new(HashMap::new()),
            connect_locks: Mutex::new(HashMap::new()),
            connectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_poa(&self, poa: Poa) -> Result<Arc<Poa>, CoreError> {
        let idx = poa.idx as usize;
        if idx >= MAX_POAS {
            return Err(CoreError::BadAccess(format!("poa index {idx} exceeds pool size {MAX_POAS}")));
        }
        let mut poas = self.poas.lock();
        if poas[idx].is_some() {
            return Err(CoreError::BadAccess(format!("poa index {idx} already registered")));
        }
        let poa = Arc::new(poa);
        poas[idx] = Some(Arc::clone(&poa));
        Ok(poa)
    }

    pub fn poa(&self, idx: u16) -> Option<Arc<Poa>> {
        self.poas.lock().get(idx as usize).and_then(Clone::clone)
    }

    pub fn register_connector(&self, scheme: &'static str, connector: Arc<dyn Connector>) {
        self.connectors.lock().insert(scheme, connector);
    }

    /// Look up an already-open session for `url`, or establish one on
    /// demand via the registered connector for its scheme. Concurrent
    /// calls for the same unconnected `url` serialize on a per-endpoint
    /// lock so only one of them actually connects; the rest observe the
    /// winner's session once it lands.
    pub async fn get_session(&self, url: &str) -> Result<Arc<dyn Session>, CoreError> {
        if let Some(session) = self.sessions.lock().get(url).cloned() {
            if !session.is_closed() {
                return Ok(session);
            }
        }

        let connect_lock = {
            let mut locks = self.connect_locks.lock();
            Arc::clone(locks.entry(url.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };
        let _guard = connect_lock.lock().await;

        // Another caller may have already connected while we waited for the lock.
        if let Some(session) = self.sessions.lock().get(url).cloned() {
            if !session.is_closed() {
                return Ok(session);
            }
        }

        let endpoint = Endpoint::parse(url)?;
        let connector = {
            let connectors = self.connectors.lock();
            connectors
                .get(endpoint.scheme())
                .cloned()
                .ok_or_else(|| CoreError::ConnectionFailed(format!("no connector registered for scheme {}", endpoint.scheme())))?
        };
        let session = connector.connect(&endpoint).await?;
        self.sessions.lock().insert(url.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Resolves `object_id`'s reference to a URL via [`select_endpoint`]
    /// (honoring `hint` if given) and gets or establishes a session for it.
    pub async fn get_session_for_object(&self, object_id: &ObjectId, hint: Option<&str>) -> Result<Arc<dyn Session>, CoreError> {
        let url = select_endpoint(object_id, self.process_uuid, hint)
            .ok_or_else(|| CoreError::BadAccess("object reference carries no urls".to_string()))?;
        self.get_session(url).await
    }

    pub fn evict_session(&self, url: &str) {
        if let Some(session) = self.sessions.lock().remove(url) {
            session.close();
        }
        self.connect_locks.lock().remove(url);
    }

    pub async fn call(&self, url: &str, buffer: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, CoreError> {
        let session = self.get_session(url).await?;
        session.send_receive(buffer, timeout).await
    }

    /// Like [`Self::call`], but resolves the URL from an [`ObjectId`]'s
    /// `urls` list via [`select_endpoint`] instead of taking one directly.
    pub async fn call_object(&self, object_id: &ObjectId, hint: Option<&str>, buffer: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, CoreError> {
        let session = self.get_session_for_object(object_id, hint).await?;
        session.send_receive(buffer, timeout).await
    }

    pub async fn call_async(&self, url: &str, buffer: Vec<u8>, timeout: Duration, completion: Completion) {
        match self.get_session(url).await {
            Ok(session) => session.send_receive_async(buffer, timeout, completion).await,
            Err(error) => completion(Err(error)),
        }
    }

    pub async fn send_unreliable(&self, url: &str, buffer: Vec<u8>) -> Result<(), CoreError> {
        let session = self.get_session(url).await?;
        session.send_datagram(buffer).await
    }

    /// Dispatch a decoded `FunctionCall` to its servant.
    pub fn dispatch(&self, poa_idx: u16, object_id: u64, function_idx: u32, params: &[u8]) -> Result<Vec<u8>, CoreError> {
        let poa = self.poa(poa_idx).ok_or(CoreError::PoaNotExist)?;
        let guard = poa.get_object(object_id).ok_or(CoreError::ObjectNotExist)?;
        guard.servant().dispatch(function_idx, params)
    }

    /// Dispatch an inbound `AddReference` control frame.
    pub fn add_reference(&self, poa_idx: u16, object_id: u64) -> Result<(), CoreError> {
        let poa = self.poa(poa_idx).ok_or(CoreError::PoaNotExist)?;
        poa.add_reference(object_id)
    }

    /// Dispatch an inbound `ReleaseObject` control frame.
    pub fn release_object(&self, poa_idx: u16, object_id: u64) -> Result<(), CoreError> {
        let poa = self.poa(poa_idx).ok_or(CoreError::PoaNotExist)?;
        poa.release_object(object_id)
    }
}

/// Resets to a minimal header-only reply of `kind` with `request_id`.
/// Used for `Success`, every `Error_*`, and plain acknowledgments.
pub fn make_simple_answer(kind: MessageKind, request_id: u32) -> Vec<u8> {
    MessageHeader::simple_answer(kind, request_id).encode().to_vec()
}

/// The result of interpreting a reply buffer, mirroring the C++ runtime's
/// `handle_standard_reply` return convention but as a typed enum instead
/// of a sentinel integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StandardReply {
    /// Header-only acknowledgment, no further data.
    Success,
    /// Caller must unmarshal the carried body.
    BlockResponse(Vec<u8>),
    /// Caller must decode the body as a tagged exception variant.
    Exception(Vec<u8>),
}

pub fn handle_standard_reply(buf: &[u8]) -> Result<StandardReply, CoreError> {
    let header = MessageHeader::decode(buf)?;
    let body = buf.get(HEADER_LEN..).unwrap_or(&[]);
    match header.kind {
        MessageKind::Success => Ok(StandardReply::Success),
        MessageKind::BlockResponse => Ok(StandardReply::BlockResponse(body.to_vec())),
        MessageKind::Exception => Ok(StandardReply::Exception(body.to_vec())),
        MessageKind::ErrorPoaNotExist => Err(CoreError::PoaNotExist),
        MessageKind::ErrorObjectNotExist => Err(CoreError::ObjectNotExist),
        MessageKind::ErrorUnknownFunctionIdx => Err(CoreError::UnknownFunctionIdx(0)),
        MessageKind::ErrorUnknownMessageId => Err(CoreError::UnknownMessageId),
        MessageKind::ErrorBadAccess => Err(CoreError::BadAccess("remote reported bad access".to_string())),
        MessageKind::ErrorBadInput => Err(CoreError::BadInput("remote reported bad input".to_string())),
        MessageKind::ErrorCommFailure => Err(CoreError::CommFailure("remote reported comm failure".to_string())),
        other => Err(CoreError::BadInput(format!("{other:?} is not a valid reply kind"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_answer_round_trips_request_id_for_success_and_errors() {
        for kind in [
            MessageKind::Success,
            MessageKind::ErrorBadAccess,
            MessageKind::ErrorObjectNotExist,
            MessageKind::ErrorCommFailure,
        ] {
            let bytes = make_simple_answer(kind, 123);
            let header = MessageHeader::decode(&bytes).unwrap();
            assert_eq!(header.request_id, 123);
            assert_eq!(header.kind, kind);
        }
    }

    #[test]
    fn handle_standard_reply_success_has_no_data() {
        let bytes = make_simple_answer(MessageKind::Success, 1);
        assert_eq!(handle_standard_reply(&bytes).unwrap(), StandardReply::Success);
    }

    #[test]
    fn handle_standard_reply_block_response_carries_body() {
        let mut bytes = MessageHeader {
            size: 4,
            kind: MessageKind::BlockResponse,
            msg_type: nprpc_protocol::MessageType::Answer,
            request_id: 7,
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(&0xCAFE_BABEu32.to_le_bytes());
        assert_eq!(
            handle_standard_reply(&bytes).unwrap(),
            StandardReply::BlockResponse(0xCAFE_BABEu32.to_le_bytes().to_vec())
        );
    }

    #[test]
    fn handle_standard_reply_error_kinds_become_typed_errors() {
        let bytes = make_simple_answer(MessageKind::ErrorObjectNotExist, 1);
        assert_eq!(handle_standard_reply(&bytes), Err(CoreError::ObjectNotExist));
    }

    #[tokio::test]
    async fn get_session_fails_without_a_registered_connector() {
        let core = RpcCore::new(Uuid::new_v4());
        let result = core.get_session("tcp://127.0.0.1:9000").await;
        assert!(matches!(result, Err(CoreError::ConnectionFailed(_))));
    }

    struct FakeSession {
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn send_receive(&self, buffer: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, CoreError> {
            Ok(buffer)
        }

        async fn send_receive_async(&self, _buffer: Vec<u8>, _timeout: Duration, completion: Completion) {
            completion(Ok(Vec::new()));
        }

        fn close(&self) {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    struct CountingConnector {
        connects: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn Session>, CoreError> {
            self.connects.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Arc::new(FakeSession { closed: std::sync::atomic::AtomicBool::new(false) }) as Arc<dyn Session>)
        }
    }

    #[tokio::test]
    async fn concurrent_get_session_calls_for_the_same_url_connect_only_once() {
        let core = Arc::new(RpcCore::new(Uuid::new_v4()));
        let connects = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        core.register_connector("tcp", Arc::new(CountingConnector { connects: Arc::clone(&connects) }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let core = Arc::clone(&core);
            handles.push(tokio::spawn(async move { core.get_session("tcp://127.0.0.1:9000").await.unwrap() }));
        }
        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 1);
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
    }

    #[tokio::test]
    async fn get_session_for_object_resolves_via_select_endpoint() {
        let core = RpcCore::new(Uuid::new_v4());
        let connects = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        core.register_connector("tcp", Arc::new(CountingConnector { connects: Arc::clone(&connects) }));

        let object = ObjectId {
            object_id: 1,
            poa_idx: 0,
            flags: 0,
            origin: Uuid::nil(),
            class_id: "IEcho".to_string(),
            urls: vec!["mem://11111111-0000-0000-0000-000000000001".to_string(), "tcp://127.0.0.1:9000".to_string()],
        };

        // core.process_uuid != object.origin, so mem:// is skipped.
        let session = core.get_session_for_object(&object, None).await.unwrap();
        assert!(!session.is_closed());
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn register_poa_rejects_duplicate_index() {
        let core = RpcCore::new(Uuid::new_v4());
        core.register_poa(Poa::new(
            "root",
            1,
            crate::poa::Lifespan::Transient,
            crate::poa::IdPolicy::SystemGenerated,
            core.process_uuid,
        ))
        .unwrap();
        let result = core.register_poa(Poa::new(
            "root2",
            1,
            crate::poa::Lifespan::Transient,
            crate::poa::IdPolicy::SystemGenerated,
            core.process_uuid,
        ));
        assert!(matches!(result, Err(CoreError::BadAccess(_))));
    }
}
