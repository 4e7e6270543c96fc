//! Wire-level data model shared by every transport: the message header
//! and kind vocabulary, endpoint URLs, and object references.

mod endpoint;
mod error;
mod header;
mod object_id;

pub use endpoint::Endpoint;
pub use error::ProtocolError;
pub use header::{MessageHeader, MessageKind, MessageType, HEADER_LEN};
pub use object_id::{select_endpoint, ObjectId, IOR_PREFIX};
