//! Message Fabricator (C8): stamps every outbound envelope with a
//! process-local monotonic `seq`, wall-clock `ts_ms`, schema version, and the
//! current recording session id. Synchronous — no I/O, no suspension.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use relay_wire::{Envelope, MessageType};

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct Fabricator {
    seq: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl Default for Fabricator {
    fn default() -> Self {
        Self {
            seq: AtomicU64::new(0),
            session_id: RwLock::new(None),
        }
    }
}

impl Fabricator {
    pub fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.write().unwrap() = session_id;
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.session_id.read().unwrap().clone()
    }

    /// Stamp a payload into a complete outbound envelope. `seq` starts at 1
    /// and is monotonic across every message type for the process lifetime.
    pub fn fabricate(&self, kind: MessageType, payload: serde_json::Value) -> Envelope {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        Envelope::new(kind, seq, now_ms(), self.current_session_id(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_starts_at_one_and_is_monotonic() {
        let fab = Fabricator::default();
        let e1 = fab.fabricate(MessageType::Heartbeat, serde_json::json!({}));
        let e2 = fab.fabricate(MessageType::Heartbeat, serde_json::json!({}));
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    #[test]
    fn envelope_carries_the_active_session_id() {
        let fab = Fabricator::default();
        fab.set_session_id(Some("race-1".into()));
        let e = fab.fabricate(MessageType::Heartbeat, serde_json::json!({}));
        assert_eq!(e.session_id.as_deref(), Some("race-1"));
    }
}
