use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Remembers when each payload was last accepted and refuses repeats inside
/// the cooldown window.
pub struct CooldownRegistry {
    window: Duration,
    capacity: Option<usize>,
    entries: Mutex<HashMap<String, Instant>>,
}

impl CooldownRegistry {
    pub fn new(window: Duration, capacity: Option<usize>) -> Self {
        Self {
            window,
            capacity: capacity.filter(|&c| c > 0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check-and-set under one lock. The record is only written when the
    /// payload is accepted.
    pub fn accept(&self, payload: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(last) = entries.get_mut(payload) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
            *last = now;
            return true;
        }

        if let Some(capacity) = self.capacity {
            while entries.len() >= capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, at)| **at)
                    .map(|(code, _)| code.clone());
                match oldest {
                    Some(code) => {
                        entries.remove(&code);
                        tracing::trace!(payload = %code, "evicted cooldown entry");
                    }
                    None => break,
                }
            }
        }

        entries.insert(payload.to_string(), now);
        true
    }

    /// Time left before `payload` may be accepted again.
    pub fn remaining(&self, payload: &str, now: Instant) -> Option<Duration> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let last = entries.get(payload)?;
        let elapsed = now.saturating_duration_since(*last);
        self.window.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
