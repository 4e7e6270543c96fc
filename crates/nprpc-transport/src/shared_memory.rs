//! Shared-memory driver (spec.md §4.I): wraps an [`nprpc_shm::Channel`] as
//! a [`nprpc_core::Session`]. A channel's reader runs on its own OS thread
//! and hands received messages to a plain callback — this module bridges
//! that callback into the generic async dispatch path via an unbounded
//! mpsc channel, and pushes outbound bytes through [`tokio::task::spawn_blocking`]
//! since `Channel::send` itself blocks (with periodic retries) until ring
//! space is available.
//!
//! Ingress is effectively zero-copy up to the callback boundary (the ring
//! view is copied out once, as `ChannelCallback::Owned` requires, to cross
//! into async context); egress goes through the same retrying blocking
//! `Channel::send` exercised directly by this module's own tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nprpc_core::{Completion, CoreError, RpcCore, SessionCore};
use nprpc_protocol::Endpoint;
use nprpc_shm::{Channel, ChannelCallback, Listener, OnConnect};
use nprpc_streams::StreamManager;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ingress::{handle_inbound_frame, IngressAction};

const SEND_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ShmSession {
    channel: Arc<Channel>,
    core: Arc<SessionCore>,
    pub streams: Arc<StreamManager>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl ShmSession {
    fn spawn(channel: Channel, rpc_core: Arc<RpcCore>, inactivity_timeout: Duration, mut inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Arc<Self> {
        let channel = Arc::new(channel);
        let (session_core, mut outbound_rx) = SessionCore::new(inactivity_timeout);
        let session_core = Arc::new(session_core);
        let streams = Arc::new(StreamManager::new());
        nprpc_streams::spawn_idle_reaper(&streams);

        let writer_channel = Arc::clone(&channel);
        let writer_task = tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                let channel = Arc::clone(&writer_channel);
                let result = tokio::task::spawn_blocking(move || channel.send(&item.bytes, SEND_RETRY_TIMEOUT)).await;
                if matches!(result, Ok(Err(_)) | Err(_)) {
                    break;
                }
            }
        });

        let reader_core = Arc::clone(&session_core);
        let reader_streams = Arc::clone(&streams);
        let reader_rpc_core = Arc::clone(&rpc_core);
        let reader_channel = Arc::clone(&channel);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = inbound_rx.recv().await {
                match handle_inbound_frame(&reader_rpc_core, &reader_core, &reader_streams, frame).await {
                    IngressAction::Reply(reply, _context) => {
                        let channel = Arc::clone(&reader_channel);
                        let result = tokio::task::spawn_blocking(move || channel.send(&reply, SEND_RETRY_TIMEOUT)).await;
                        if matches!(result, Ok(Err(_)) | Err(_)) {
                            break;
                        }
                    }
                    IngressAction::Consumed => {}
                }
                if reader_core.is_closed() {
                    break;
                }
            }
            reader_core.close();
        });

        Arc::new(ShmSession {
            channel,
            core: session_core,
            streams,
            reader_task,
            writer_task,
        })
    }
}

#[async_trait]
impl nprpc_core::Session for ShmSession {
    async fn send_receive(&self, buffer: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, CoreError> {
        let (request_id, rx) = self.core.register_pending();
        let buffer = crate::framing::patch_request_id(buffer, request_id);
        self.core.enqueue_outbound(buffer)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::SessionClosed),
            Err(_) => {
                self.core.cancel_pending(request_id);
                Err(CoreError::Timeout)
            }
        }
    }

    async fn send_receive_async(&self, buffer: Vec<u8>, timeout: Duration, completion: Completion) {
        let (request_id, rx) = self.core.register_pending();
        let buffer = crate::framing::patch_request_id(buffer, request_id);
        if let Err(error) = self.core.enqueue_outbound(buffer) {
            completion(Err(error));
            return;
        }
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(CoreError::SessionClosed),
                Err(_) => Err(CoreError::Timeout),
            };
            completion(result);
        });
    }

    fn close(&self) {
        self.core.close();
        self.reader_task.abort();
        self.writer_task.abort();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

pub struct ShmConnector {
    rpc_core: Arc<RpcCore>,
    inactivity_timeout: Duration,
    capacity: usize,
    max_message_size: usize,
    handshake_timeout: Duration,
}

impl ShmConnector {
    pub fn new(rpc_core: Arc<RpcCore>, inactivity_timeout: Duration, capacity: usize, max_message_size: usize, handshake_timeout: Duration) -> Self {
        ShmConnector { rpc_core, inactivity_timeout, capacity, max_message_size, handshake_timeout }
    }
}

#[async_trait]
impl nprpc_core::Connector for ShmConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn nprpc_core::Session>, CoreError> {
        let Endpoint::SharedMemory { listener_uuid } = endpoint else {
            return Err(CoreError::BadInput("ShmConnector only handles mem:// endpoints".to_string()));
        };
        let listener_uuid = *listener_uuid;
        let (tx, rx) = mpsc::unbounded_channel();
        let callback = ChannelCallback::Owned(Arc::new(move |bytes: Vec<u8>| {
            let _ = tx.send(bytes);
        }));

        let capacity = self.capacity;
        let max_message_size = self.max_message_size;
        let handshake_timeout = self.handshake_timeout;
        let channel = tokio::task::spawn_blocking(move || nprpc_shm::connect(listener_uuid, capacity, max_message_size, handshake_timeout, callback))
            .await
            .map_err(|e| CoreError::ConnectionFailed(e.to_string()))?
            .map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;

        Ok(ShmSession::spawn(channel, Arc::clone(&self.rpc_core), self.inactivity_timeout, rx))
    }
}

/// Handed to the connection factory closure so it can stash the mpsc
/// receiver it creates for `new_channel_callback()`'s own use, to be
/// picked up moments later by `on_connect` for the same connection.
/// [`Listener::bind`]'s accept thread calls the factory and `on_connect`
/// back-to-back for one connection at a time, so a single slot is safe.
type HandoffSlot = Arc<Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>;

/// Binds a shared-memory listener that spawns an [`ShmSession`] per
/// inbound channel, pushing each into `sessions` for the caller to track.
pub fn serve(
    rpc_core: Arc<RpcCore>,
    listener_uuid: Uuid,
    capacity: usize,
    max_message_size: usize,
    inactivity_timeout: Duration,
) -> Result<(Listener, Arc<Mutex<Vec<Arc<ShmSession>>>>), CoreError> {
    let sessions: Arc<Mutex<Vec<Arc<ShmSession>>>> = Arc::new(Mutex::new(Vec::new()));
    let handoff: HandoffSlot = Arc::new(Mutex::new(None));

    let handoff_for_factory = Arc::clone(&handoff);
    let new_channel_callback = move || {
        let (tx, rx) = mpsc::unbounded_channel();
        *handoff_for_factory.lock().unwrap() = Some(rx);
        ChannelCallback::Owned(Arc::new(move |bytes: Vec<u8>| {
            let _ = tx.send(bytes);
        }))
    };

    let handoff_for_connect = Arc::clone(&handoff);
    let sessions_for_connect = Arc::clone(&sessions);
    let rpc_core_for_connect = Arc::clone(&rpc_core);
    let on_connect: OnConnect = Arc::new(move |channel: Channel| {
        let rx = handoff_for_connect
            .lock()
            .unwrap()
            .take()
            .expect("new_channel_callback always runs immediately before on_connect");
        let session = ShmSession::spawn(channel, Arc::clone(&rpc_core_for_connect), inactivity_timeout, rx);
        sessions_for_connect.lock().unwrap().push(session);
    });

    let listener = Listener::bind(listener_uuid, capacity, max_message_size, new_channel_callback, on_connect)
        .map_err(|e| CoreError::CommFailure(e.to_string()))?;
    Ok((listener, sessions))
}
