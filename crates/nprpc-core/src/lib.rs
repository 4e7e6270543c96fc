//! Session, object-adapter, and RPC-core plumbing: everything a transport
//! driver needs to turn bytes on a wire into a dispatched call and back.

mod context;
mod error;
mod poa;
mod rpc_core;
mod session;

pub use context::{SameSite, SessionContext, SetCookie, SESSION_CONTEXT};
pub use error::CoreError;
pub use poa::{ActivationFlags, IdPolicy, Lifespan, ListenConfig, ObjectGuard, Poa, Servant};
pub use rpc_core::{handle_standard_reply, make_simple_answer, Connector, RpcCore, StandardReply, MAX_POAS};
pub use session::{Completion, OutboundItem, Session, SessionCore};

pub use nprpc_protocol::{select_endpoint, Endpoint, MessageHeader, MessageKind, MessageType, ObjectId, ProtocolError, HEADER_LEN, IOR_PREFIX};
