use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::dispatch::ActionDecision;

#[derive(Debug, Clone, Serialize)]
pub struct LastDetection {
    pub payload: String,
    pub action: ActionDecision,
    pub at: DateTime<Local>,
}

/// Process-wide counters shared between the detection loop and the status
/// endpoint.
#[derive(Default)]
pub struct RuntimeStatus {
    frames: AtomicU64,
    detections: AtomicU64,
    accepted: AtomicU64,
    suppressed: AtomicU64,
    gate_triggers: AtomicU64,
    camera_reconnects: AtomicU64,
    last: Mutex<Option<LastDetection>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub frames: u64,
    pub detections: u64,
    pub accepted: u64,
    pub suppressed: u64,
    pub gate_triggers: u64,
    pub camera_reconnects: u64,
    pub last_detection: Option<LastDetection>,
}

impl RuntimeStatus {
    pub fn record_frame(&self) -> u64 {
        self.frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_detections(&self, count: usize) {
        self.detections.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self, payload: &str, action: ActionDecision) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(LastDetection {
            payload: payload.to_string(),
            action,
            at: Local::now(),
        });
    }

    pub fn record_gate_trigger(&self) {
        self.gate_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.camera_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            gate_triggers: self.gate_triggers.load(Ordering::Relaxed),
            camera_reconnects: self.camera_reconnects.load(Ordering::Relaxed),
            last_detection: self.last.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}
