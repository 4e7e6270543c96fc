//! Canned [`Servant`] implementations reused across the integration
//! suite, grounded on the `Echo` double every transport driver's own
//! `#[cfg(test)]` module defines inline (see e.g.
//! `nprpc-transport/src/tcp.rs`'s test module) — lifted out here once so
//! the six end-to-end scenario tests don't each redeclare it.

use std::sync::Mutex;
use std::time::Duration;

use nprpc_core::{CoreError, Servant};

/// Echoes `params` back unchanged for `function_idx == 0`; any other
/// index fails with `UnknownFunctionIdx`.
pub struct EchoServant;

impl Servant for EchoServant {
    fn class_id(&self) -> &str {
        "Echo"
    }

    fn dispatch(&self, function_idx: u32, params: &[u8]) -> Result<Vec<u8>, CoreError> {
        match function_idx {
            0 => Ok(params.to_vec()),
            other => Err(CoreError::UnknownFunctionIdx(other)),
        }
    }
}

/// Records every call it receives so a test can assert on call count,
/// ordering, and the exact bytes a given invocation carried.
#[derive(Default)]
pub struct RecordingServant {
    calls: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl RecordingServant {
    pub fn new() -> Self {
        RecordingServant::default()
    }

    pub fn calls(&self) -> Vec<(u32, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Servant for RecordingServant {
    fn class_id(&self) -> &str {
        "Recording"
    }

    fn dispatch(&self, function_idx: u32, params: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.calls.lock().unwrap().push((function_idx, params.to_vec()));
        Ok(params.to_vec())
    }
}

/// Blocks the dispatching thread for a fixed delay before echoing back —
/// `Servant::dispatch` is a synchronous call, so this is a plain
/// `std::thread::sleep` rather than an async one; kept short (sub-second)
/// so it never meaningfully starves the runtime's other worker threads,
/// matching how the corpus's own blocking-servant doubles are written.
pub struct DelayedServant {
    pub delay: Duration,
}

impl DelayedServant {
    pub fn new(delay: Duration) -> Self {
        DelayedServant { delay }
    }
}

impl Servant for DelayedServant {
    fn class_id(&self) -> &str {
        "Delayed"
    }

    fn dispatch(&self, _function_idx: u32, params: &[u8]) -> Result<Vec<u8>, CoreError> {
        std::thread::sleep(self.delay);
        Ok(params.to_vec())
    }
}

/// Always fails with a caller-supplied error, for exercising the error
/// reply path (`ErrorBadAccess`, `ErrorBadInput`, etc.) end to end.
pub struct FailingServant {
    pub error: CoreError,
}

impl FailingServant {
    pub fn new(error: CoreError) -> Self {
        FailingServant { error }
    }
}

impl Servant for FailingServant {
    fn class_id(&self) -> &str {
        "Failing"
    }

    fn dispatch(&self, _function_idx: u32, _params: &[u8]) -> Result<Vec<u8>, CoreError> {
        Err(self.error.clone())
    }
}
