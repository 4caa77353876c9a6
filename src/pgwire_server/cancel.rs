//! Process-wide CancelRequest registry keyed by BackendKeyData (pid, secret).

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::CancelSignal;

#[derive(Default)]
pub struct CancelRegistry {
    sessions: Mutex<HashMap<(i32, i32), CancelSignal>>,
}

/// Removes its registry entry when the session ends.
pub struct Registration<'a> {
    registry: &'a CancelRegistry,
    key: (i32, i32),
}

impl Drop for Registration<'_> {
    fn drop(&mut self) { self.registry.sessions.lock().remove(&self.key); }
}

impl CancelRegistry {
    pub fn register(&self, pid: i32, secret: i32, signal: CancelSignal) -> Registration<'_> {
        self.sessions.lock().insert((pid, secret), signal);
        Registration { registry: self, key: (pid, secret) }
    }

    /// Fire the matching session's signal. Unknown keys are ignored, as postgres does.
    pub fn cancel(&self, pid: i32, secret: i32) -> bool {
        let signal = self.sessions.lock().get(&(pid, secret)).cloned();
        match signal {
            Some(s) => {
                info!(target: "pgwire", "cancel request for pid={}", pid);
                s.cancel();
                true
            }
            None => {
                debug!(target: "pgwire", "cancel request for unknown key pid={}", pid);
                false
            }
        }
    }

    pub fn len(&self) -> usize { self.sessions.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Random secret for BackendKeyData.
pub fn new_secret() -> i32 {
    let mut bytes = [0u8; 4];
    if getrandom::getrandom(&mut bytes).is_err() {
        let nanos = chrono::Utc::now().timestamp_subsec_nanos();
        bytes = nanos.to_be_bytes();
    }
    i32::from_be_bytes(bytes)
}
