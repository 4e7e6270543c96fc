//! Shared test scaffolding for the end-to-end scenario suite: an
//! in-process [`harness::TestNode`] that binds real transport listeners
//! on loopback, canned [`servants`], raw [`frame`] builders, and a
//! [`stream`] bridge for driving streaming RPC by hand.

pub mod frame;
pub mod harness;
pub mod servants;
pub mod stream;

pub use frame::{function_call, function_call_raw, split_reply};
pub use harness::{connect_shared_memory, TestNode, TestNodeBuilder};
pub use servants::{DelayedServant, EchoServant, FailingServant, RecordingServant};
pub use stream::{drain_stream_events, SessionStreamWriter};
