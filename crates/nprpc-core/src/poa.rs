//! Object Adapter: servant registry, object-id allocation, and the
//! activation-flags → URL synthesis that produces an object's candidate
//! endpoint list.

use crate::error::CoreError;
use bitflags::bitflags;
use nprpc_protocol::{Endpoint, ObjectId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActivationFlags: u16 {
        const ALLOW_TCP = 1 << 0;
        const ALLOW_WS = 1 << 1;
        const ALLOW_HTTP = 1 << 2;
        const ALLOW_QUIC = 1 << 3;
        const ALLOW_UDP = 1 << 4;
        const ALLOW_SHARED_MEMORY = 1 << 5;
        const ALLOW_ALL = Self::ALLOW_TCP.bits()
            | Self::ALLOW_WS.bits()
            | Self::ALLOW_HTTP.bits()
            | Self::ALLOW_QUIC.bits()
            | Self::ALLOW_UDP.bits()
            | Self::ALLOW_SHARED_MEMORY.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifespan {
    Persistent,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    SystemGenerated,
    UserSupplied,
}

/// The local implementation object behind an `Object`. Dispatch looks
/// servants up by `(poa_idx, object_id)` and invokes `dispatch`.
pub trait Servant: Send + Sync {
    fn class_id(&self) -> &str;

    /// Invoke `function_idx` with `params`, writing the return-value
    /// bytes (or an IDL exception) into the reply buffer. Returns
    /// `UnknownFunctionIdx` for an out-of-range index.
    fn dispatch(&self, function_idx: u32, params: &[u8]) -> Result<Vec<u8>, CoreError>;
}

struct Slot {
    servant: Option<Arc<dyn Servant>>,
    generation: u32,
    in_use: Arc<AtomicU32>,
    /// Remote reference count for `Lifespan::Persistent` objects, started
    /// at 1 by `activate_object` for the reference it returns. `Transient`
    /// objects don't track this — their lifetime is governed entirely by
    /// `deactivate_object`, not remote `AddReference`/`ReleaseObject`.
    refcount: AtomicU32,
}

/// The process's listen configuration, consulted when synthesizing an
/// object's URL list. A flag requesting a transport the process didn't
/// enable simply doesn't contribute a URL — it is not an error.
pub struct ListenConfig {
    pub hostname: String,
    pub tcp_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub http_port: Option<u16>,
    pub quic_port: Option<u16>,
    pub udp_port: Option<u16>,
    pub shared_memory_listener_uuid: Option<Uuid>,
}

/// A scoped reference to an active servant. Increments the slot's in-use
/// counter on acquisition and decrements on drop, so dispatch can never
/// race with `deactivate_object`'s deletion.
pub struct ObjectGuard {
    servant: Arc<dyn Servant>,
    in_use: Arc<AtomicU32>,
}

impl ObjectGuard {
    pub fn servant(&self) -> &dyn Servant {
        self.servant.as_ref()
    }
}

impl Drop for ObjectGuard {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One POA: a name, a small index, and a table of servant slots keyed by
/// `object_id`'s low bits.
pub struct Poa {
    pub name: String,
    pub idx: u16,
    lifespan: Lifespan,
    id_policy: IdPolicy,
    process_origin: Uuid,
    generation_base: u32,
    slots: Mutex<HashMap<u64, Slot>>,
    next_system_id: AtomicU64,
}

impl Poa {
    pub fn new(name: impl Into<String>, idx: u16, lifespan: Lifespan, id_policy: IdPolicy, process_origin: Uuid) -> Self {
        Poa {
            name: name.into(),
            idx,
            lifespan,
            id_policy,
            process_origin,
            generation_base: std::process::id(),
            slots: Mutex::new(HashMap::new()),
            next_system_id: AtomicU64::new(1),
        }
    }

    /// Allocate (or accept a user-supplied) object id, synthesize its URL
    /// list from `flags` and `listen`, and register `servant`.
    pub fn activate_object(
        &self,
        servant: Arc<dyn Servant>,
        flags: ActivationFlags,
        listen: &ListenConfig,
        user_supplied_id: Option<u64>,
    ) -> Result<ObjectId, CoreError> {
        let raw_id = match (self.id_policy, user_supplied_id) {
            (IdPolicy::SystemGenerated, _) => self.next_system_id.fetch_add(1, Ordering::Relaxed),
            (IdPolicy::UserSupplied, Some(id)) => id,
            (IdPolicy::UserSupplied, None) => {
                return Err(CoreError::BadAccess("UserSupplied POA requires an explicit id".to_string()))
            }
        };

        let mut slots = self.slots.lock();
        if self.id_policy == IdPolicy::UserSupplied && slots.contains_key(&raw_id) {
            return Err(CoreError::BadAccess(format!("object id {raw_id} already activated")));
        }

        let generation = self.generation_base;
        slots.insert(
            raw_id,
            Slot {
                servant: Some(Arc::clone(&servant)),
                generation,
                in_use: Arc::new(AtomicU32::new(0)),
                refcount: AtomicU32::new(1),
            },
        );
        drop(slots);

        let object_id = match self.lifespan {
            Lifespan::Transient => (u64::from(generation) << 32) | raw_id,
            Lifespan::Persistent => raw_id,
        };

        Ok(ObjectId {
            object_id,
            poa_idx: self.idx,
            flags: flags.bits(),
            origin: self.process_origin,
            class_id: servant.class_id().to_string(),
            urls: synthesize_urls(flags, listen),
        })
    }

    /// Mark the slot to-delete; actual removal happens once the servant's
    /// in-use counter reaches zero (enforced by `get_object`/`ObjectGuard`
    /// cooperating, not by this call blocking).
    pub fn deactivate_object(&self, raw_id: u64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&raw_id) {
            if slot.in_use.load(Ordering::Acquire) == 0 {
                slots.remove(&raw_id);
            } else {
                slot.servant = None;
            }
        }
    }

    /// Increments a remote reference count for `object_id`. A no-op for
    /// `Lifespan::Transient` objects (existence is still checked) since
    /// those are never remotely reference-counted.
    pub fn add_reference(&self, object_id: u64) -> Result<(), CoreError> {
        let raw_id = self.unwrap_id(object_id);
        if self.lifespan == Lifespan::Transient && self.generation_of(object_id) != self.generation_base {
            return Err(CoreError::ObjectNotExist);
        }
        let slots = self.slots.lock();
        let slot = slots.get(&raw_id).ok_or(CoreError::ObjectNotExist)?;
        if self.lifespan == Lifespan::Persistent {
            slot.refcount.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Decrements `object_id`'s remote reference count; once it reaches
    /// zero the slot is torn down exactly as [`Self::deactivate_object`]
    /// would (immediately if unused, or deferred to the last
    /// [`ObjectGuard`] drop). A no-op for `Lifespan::Transient` objects.
    pub fn release_object(&self, object_id: u64) -> Result<(), CoreError> {
        let raw_id = self.unwrap_id(object_id);
        if self.lifespan == Lifespan::Transient && self.generation_of(object_id) != self.generation_base {
            return Err(CoreError::ObjectNotExist);
        }
        if self.lifespan == Lifespan::Transient {
            let slots = self.slots.lock();
            return if slots.contains_key(&raw_id) { Ok(()) } else { Err(CoreError::ObjectNotExist) };
        }

        let hit_zero = {
            let slots = self.slots.lock();
            let slot = slots.get(&raw_id).ok_or(CoreError::ObjectNotExist)?;
            slot.refcount.fetch_sub(1, Ordering::AcqRel) <= 1
        };
        if hit_zero {
            self.deactivate_object(raw_id);
        }
        Ok(())
    }

    fn unwrap_id(&self, object_id: u64) -> u64 {
        match self.lifespan {
            Lifespan::Transient => object_id & 0xFFFF_FFFF,
            Lifespan::Persistent => object_id,
        }
    }

    fn generation_of(&self, object_id: u64) -> u32 {
        (object_id >> 32) as u32
    }

    /// Look up the servant for `object_id`, returning a guard that keeps
    /// it alive against concurrent deactivation. A stale transient
    /// reference (generation mismatch) or an already-deactivated id
    /// returns `None`.
    pub fn get_object(&self, object_id: u64) -> Option<ObjectGuard> {
        let raw_id = self.unwrap_id(object_id);
        if self.lifespan == Lifespan::Transient && self.generation_of(object_id) != self.generation_base {
            return None;
        }
        let slots = self.slots.lock();
        let slot = slots.get(&raw_id)?;
        let servant = slot.servant.clone()?;
        slot.in_use.fetch_add(1, Ordering::AcqRel);
        Some(ObjectGuard {
            servant,
            in_use: Arc::clone(&slot.in_use),
        })
    }
}

fn synthesize_urls(flags: ActivationFlags, listen: &ListenConfig) -> Vec<String> {
    let mut urls = Vec::new();
    if flags.contains(ActivationFlags::ALLOW_SHARED_MEMORY) {
        if let Some(uuid) = listen.shared_memory_listener_uuid {
            urls.push(Endpoint::SharedMemory { listener_uuid: uuid }.format());
        }
    }
    if flags.contains(ActivationFlags::ALLOW_TCP) {
        if let Some(port) = listen.tcp_port {
            urls.push(
                Endpoint::Tcp {
                    host: listen.hostname.clone(),
                    port,
                }
                .format(),
            );
        }
    }
    if flags.contains(ActivationFlags::ALLOW_WS) {
        if let Some(port) = listen.ws_port {
            urls.push(
                Endpoint::WebSocket {
                    host: listen.hostname.clone(),
                    port,
                    path: "/rpc".to_string(),
                }
                .format(),
            );
        }
    }
    if flags.contains(ActivationFlags::ALLOW_HTTP) {
        if let Some(port) = listen.http_port {
            urls.push(
                Endpoint::Http {
                    host: listen.hostname.clone(),
                    port,
                    path: "/rpc".to_string(),
                }
                .format(),
            );
        }
    }
    if flags.contains(ActivationFlags::ALLOW_QUIC) {
        if let Some(port) = listen.quic_port {
            urls.push(
                Endpoint::Quic {
                    host: listen.hostname.clone(),
                    port,
                }
                .format(),
            );
        }
    }
    if flags.contains(ActivationFlags::ALLOW_UDP) {
        if let Some(port) = listen.udp_port {
            urls.push(
                Endpoint::Udp {
                    host: listen.hostname.clone(),
                    port,
                }
                .format(),
            );
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl Servant for Echo {
        fn class_id(&self) -> &str {
            "IEcho"
        }
        fn dispatch(&self, function_idx: u32, _params: &[u8]) -> Result<Vec<u8>, CoreError> {
            match function_idx {
                0 => Ok(0xCAFE_BABEu32.to_le_bytes().to_vec()),
                other => Err(CoreError::UnknownFunctionIdx(other)),
            }
        }
    }

    fn listen_with_mem(uuid: Uuid) -> ListenConfig {
        ListenConfig {
            hostname: "localhost".to_string(),
            tcp_port: Some(9000),
            ws_port: None,
            http_port: None,
            quic_port: None,
            udp_port: None,
            shared_memory_listener_uuid: Some(uuid),
        }
    }

    #[test]
    fn activate_prepends_shared_memory_when_allowed() {
        let origin = Uuid::new_v4();
        let listener_uuid = Uuid::new_v4();
        let poa = Poa::new("root", 1, Lifespan::Transient, IdPolicy::SystemGenerated, origin);
        let oid = poa
            .activate_object(
                Arc::new(Echo),
                ActivationFlags::ALLOW_SHARED_MEMORY | ActivationFlags::ALLOW_TCP,
                &listen_with_mem(listener_uuid),
                None,
            )
            .unwrap();
        assert_eq!(oid.urls[0], format!("mem://{listener_uuid}"));
        assert_eq!(oid.urls[1], "tcp://localhost:9000");
    }

    #[test]
    fn disabled_transport_silently_drops_its_url() {
        let poa = Poa::new("root", 1, Lifespan::Transient, IdPolicy::SystemGenerated, Uuid::new_v4());
        let listen = ListenConfig {
            hostname: "localhost".to_string(),
            tcp_port: None,
            ws_port: None,
            http_port: None,
            quic_port: None,
            udp_port: None,
            shared_memory_listener_uuid: None,
        };
        let oid = poa
            .activate_object(Arc::new(Echo), ActivationFlags::ALLOW_TCP, &listen, None)
            .unwrap();
        assert!(oid.urls.is_empty());
    }

    #[test]
    fn get_object_guard_blocks_deletion_until_dropped() {
        let poa = Poa::new("root", 1, Lifespan::Transient, IdPolicy::SystemGenerated, Uuid::new_v4());
        let listen = listen_with_mem(Uuid::new_v4());
        let oid = poa.activate_object(Arc::new(Echo), ActivationFlags::ALLOW_ALL, &listen, None).unwrap();
        let raw_id = oid.object_id & 0xFFFF_FFFF;

        let guard = poa.get_object(oid.object_id).unwrap();
        poa.deactivate_object(raw_id);
        // Deactivation with a live guard clears the slot's servant
        // pointer immediately; the guard itself stays valid.
        assert!(poa.get_object(oid.object_id).is_none());
        assert_eq!(guard.servant().dispatch(0, &[]).unwrap(), 0xCAFE_BABEu32.to_le_bytes().to_vec());
        drop(guard);
        assert!(poa.get_object(oid.object_id).is_none());
    }

    #[test]
    fn stale_transient_generation_is_rejected() {
        let poa = Poa::new("root", 1, Lifespan::Transient, IdPolicy::SystemGenerated, Uuid::new_v4());
        let listen = listen_with_mem(Uuid::new_v4());
        let oid = poa.activate_object(Arc::new(Echo), ActivationFlags::ALLOW_ALL, &listen, None).unwrap();

        let forged_generation = (u64::from(oid.object_id as u32)) | (0xDEAD_BEEFu64 << 32);
        assert!(poa.get_object(forged_generation).is_none());
        assert!(poa.get_object(oid.object_id).is_some());
    }

    #[test]
    fn user_supplied_duplicate_id_fails() {
        let poa = Poa::new("root", 2, Lifespan::Persistent, IdPolicy::UserSupplied, Uuid::new_v4());
        let listen = listen_with_mem(Uuid::new_v4());
        poa.activate_object(Arc::new(Echo), ActivationFlags::ALLOW_ALL, &listen, Some(5)).unwrap();
        let result = poa.activate_object(Arc::new(Echo), ActivationFlags::ALLOW_ALL, &listen, Some(5));
        assert!(matches!(result, Err(CoreError::BadAccess(_))));
    }

    #[test]
    fn persistent_object_is_destroyed_once_refcount_reaches_zero() {
        let poa = Poa::new("root", 3, Lifespan::Persistent, IdPolicy::UserSupplied, Uuid::new_v4());
        let listen = listen_with_mem(Uuid::new_v4());
        let oid = poa.activate_object(Arc::new(Echo), ActivationFlags::ALLOW_ALL, &listen, Some(1)).unwrap();

        poa.add_reference(oid.object_id).unwrap(); // refcount now 2
        poa.release_object(oid.object_id).unwrap(); // back to 1, still alive
        assert!(poa.get_object(oid.object_id).is_some());

        poa.release_object(oid.object_id).unwrap(); // hits 0, destroyed
        assert!(poa.get_object(oid.object_id).is_none());
    }

    #[test]
    fn release_object_on_unknown_id_errors() {
        let poa = Poa::new("root", 3, Lifespan::Persistent, IdPolicy::UserSupplied, Uuid::new_v4());
        assert!(matches!(poa.release_object(42), Err(CoreError::ObjectNotExist)));
        assert!(matches!(poa.add_reference(42), Err(CoreError::ObjectNotExist)));
    }

    #[test]
    fn transient_objects_are_not_remotely_reference_counted() {
        let poa = Poa::new("root", 1, Lifespan::Transient, IdPolicy::SystemGenerated, Uuid::new_v4());
        let listen = listen_with_mem(Uuid::new_v4());
        let oid = poa.activate_object(Arc::new(Echo), ActivationFlags::ALLOW_ALL, &listen, None).unwrap();

        poa.add_reference(oid.object_id).unwrap();
        // A single release doesn't destroy it: transient lifetime is
        // governed by deactivate_object, not the refcount.
        poa.release_object(oid.object_id).unwrap();
        assert!(poa.get_object(oid.object_id).is_some());
    }

    #[test]
    fn dispatch_unknown_function_idx_errors() {
        let echo = Echo;
        assert!(matches!(echo.dispatch(99, &[]), Err(CoreError::UnknownFunctionIdx(99))));
        assert_eq!(echo.dispatch(0, &[]).unwrap(), 0xCAFE_BABEu32.to_le_bytes().to_vec());
    }
}
