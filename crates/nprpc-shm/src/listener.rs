//! The well-known accept point a server process exposes so clients can
//! request a dedicated channel.

use crate::channel::{Channel, ChannelCallback};
use crate::handshake::{HandshakeMessage, ReadyFlag};
use crate::segment::{Role, ShmRing};
use crate::ShmError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub fn listener_ring_name(server_uuid: Uuid) -> String {
    format!("/nprpc-listen-{}", server_uuid.simple())
}

fn channel_ring_name(channel_uuid: Uuid, suffix: &str) -> String {
    format!("/nprpc-ch-{}-{}", channel_uuid.simple(), suffix)
}

/// Dispatched once per successfully established inbound channel. Called
/// from the listener's own accept thread, so it should hand off rather
/// than block.
pub type OnConnect = Arc<dyn Fn(Channel) + Send + Sync>;

pub struct Listener {
    accept_ring: Arc<ShmRing>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Listener {
    pub fn bind(
        server_uuid: Uuid,
        capacity: usize,
        max_message_size: usize,
        new_channel_callback: impl Fn() -> ChannelCallback + Send + Sync + 'static,
        on_connect: OnConnect,
    ) -> Result<Self, ShmError> {
        let name = listener_ring_name(server_uuid);
        let ring = Arc::new(ShmRing::new(&name, capacity, max_message_size, Role::Create)?);
        let stop = Arc::new(AtomicBool::new(false));

        let accept_for_thread = Arc::clone(&ring);
        let stop_for_thread = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            while !stop_for_thread.load(Ordering::Acquire) {
                match accept_for_thread.ring.try_read_view() {
                    Some(view) => {
                        let result = HandshakeMessage::decode(view.bytes());
                        accept_for_thread.ring.commit_read(view);
                        if let Ok(handshake) = result {
                            match accept_inbound(&handshake, capacity, max_message_size, new_channel_callback()) {
                                Ok(channel) => on_connect(channel),
                                Err(error) => {
                                    tracing::warn!(?error, channel = %handshake.channel_uuid, "failed to establish inbound channel");
                                }
                            }
                        } else {
                            tracing::warn!("discarding malformed handshake on listener ring");
                        }
                    }
                    None => accept_for_thread.ring.wait_for_data(POLL_TIMEOUT),
                }
            }
        });

        Ok(Listener {
            accept_ring: ring,
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        // `accept_ring` is dropped here, unlinking the listener's
        // well-known shm object.
    }
}

fn accept_inbound(
    handshake: &HandshakeMessage,
    capacity: usize,
    max_message_size: usize,
    callback: ChannelCallback,
) -> Result<Channel, ShmError> {
    let s2c_name = channel_ring_name(handshake.channel_uuid, "s2c");
    let c2s_name = channel_ring_name(handshake.channel_uuid, "c2s");

    // Server sends on s2c, receives on c2s.
    let send = ShmRing::new(&s2c_name, capacity, max_message_size, Role::Create)?;
    let recv = ShmRing::new(&c2s_name, capacity, max_message_size, Role::Create)?;

    let ready_flag = ReadyFlag::open(&handshake.ready_flag_name)?;
    let channel = Channel::spawn(send, recv, callback);

    let echo = HandshakeMessage::new(handshake.channel_uuid, &handshake.ready_flag_name).encode();
    channel.send(&echo, Duration::from_secs(1))?;

    ready_flag.set_ready();
    Ok(channel)
}

/// Client side of the handshake: deposit a request on the server's
/// listener ring, wait for the server to flip the ready flag, then attach
/// to the dedicated channel it created.
pub fn connect(
    server_uuid: Uuid,
    capacity: usize,
    max_message_size: usize,
    timeout: Duration,
    callback: ChannelCallback,
) -> Result<Channel, ShmError> {
    let channel_uuid = Uuid::new_v4();
    let ready_flag_name = format!("/nprpc-ready-{}", channel_uuid.simple());
    let ready_flag = ReadyFlag::create(&ready_flag_name)?;

    let listener_name = listener_ring_name(server_uuid);
    let listener = ShmRing::new(&listener_name, capacity, max_message_size, Role::Open)
        .map_err(|_| ShmError::ConnectionFailed(format!("listener {listener_name} not reachable")))?;

    let handshake = HandshakeMessage::new(channel_uuid, &ready_flag_name);
    let wire = handshake.encode();
    loop {
        if let Some(mut reservation) = listener.ring.try_reserve_write(wire.len())? {
            reservation.bytes_mut().copy_from_slice(&wire);
            listener.ring.commit_write(reservation, wire.len());
            break;
        }
        listener.ring.wait_for_space(Duration::from_millis(100));
    }

    ready_flag.wait_ready(timeout)?;

    let s2c_name = channel_ring_name(channel_uuid, "s2c");
    let c2s_name = channel_ring_name(channel_uuid, "c2s");
    // Client receives on s2c, sends on c2s (inverted from the server).
    let recv = ShmRing::new(&s2c_name, capacity, max_message_size, Role::Open)?;
    let send = ShmRing::new(&c2s_name, capacity, max_message_size, Role::Open)?;

    let echo_view = recv
        .ring
        .try_read_view()
        .ok_or_else(|| ShmError::ConnectionFailed("server did not echo handshake".to_string()))?;
    let echoed = HandshakeMessage::decode(echo_view.bytes())?;
    recv.ring.commit_read(echo_view);
    if echoed.channel_uuid != channel_uuid {
        return Err(ShmError::HandshakeMismatch);
    }

    Ok(Channel::spawn(send, recv, callback))
}
