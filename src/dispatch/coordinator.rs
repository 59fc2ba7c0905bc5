use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use opencv::core::Mat;
use opencv::prelude::*;

use crate::actuator::Actuator;
use crate::detection::{CooldownRegistry, DetectionEvent};
use crate::status::RuntimeStatus;
use crate::storage::{ArtifactError, ArtifactStore};

use super::backend::{ActionDecision, BackendClient, FollowUp, SubmitOutcome};
use super::resolver::{ActionResolver, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Triggered,
    /// The backend accepted but the actuator could not be reached.
    NotTriggered,
    /// The backend did not accept, so the gate was left alone.
    Skipped,
}

/// Everything that happened to one accepted detection.
#[derive(Debug)]
pub struct DispatchReport {
    pub payload: String,
    pub resolution: Resolution,
    pub decision: ActionDecision,
    pub submit: SubmitOutcome,
    pub gate: GateOutcome,
    pub artifact: Result<PathBuf, ArtifactError>,
}

impl DispatchReport {
    fn log(&self) {
        let payload = self.payload.as_str();
        let action = self.decision;
        if self.resolution.is_fallback() {
            tracing::debug!(payload = %payload, resolution = ?self.resolution, "action defaulted");
        } else {
            tracing::debug!(payload = %payload, resolution = ?self.resolution, "action resolved");
        }

        match &self.submit {
            SubmitOutcome::Accepted(body) => {
                tracing::info!(
                    payload = %payload,
                    action = %action,
                    message = body.message.as_deref().unwrap_or("OK"),
                    "backend accepted detection"
                );
                match body.follow_up() {
                    Some(FollowUp::OpenGate) => {
                        tracing::info!(payload = %payload, "backend requested gate opening");
                    }
                    Some(FollowUp::ShowPayment { amount, duration }) => {
                        tracing::info!(
                            payload = %payload,
                            amount = format!("{amount:.2}"),
                            duration = duration.as_deref().unwrap_or("N/A"),
                            "payment due"
                        );
                    }
                    Some(FollowUp::Other(hint)) => {
                        tracing::debug!(payload = %payload, hint = %hint, "unrecognised follow-up action");
                    }
                    None => {}
                }
            }
            SubmitOutcome::Conflict { message } => {
                tracing::warn!(
                    payload = %payload,
                    action = %action,
                    reason = message.as_deref().unwrap_or("-"),
                    "vehicle already registered"
                );
            }
            SubmitOutcome::ServerError {
                status,
                duplicate: true,
                ..
            } => {
                tracing::warn!(
                    payload = %payload,
                    action = %action,
                    status = status,
                    "vehicle already exists in backend, exit expected instead of entry"
                );
            }
            SubmitOutcome::ServerError { status, body, .. } => {
                tracing::error!(
                    payload = %payload,
                    action = %action,
                    status = status,
                    body = %body,
                    "backend internal error"
                );
            }
            SubmitOutcome::Rejected { status, body } => {
                tracing::warn!(
                    payload = %payload,
                    action = %action,
                    status = status,
                    body = %body,
                    "backend rejected detection"
                );
            }
            SubmitOutcome::Malformed(reason) => {
                tracing::warn!(payload = %payload, reason = %reason, "unreadable backend response");
            }
            SubmitOutcome::Timeout => {
                tracing::warn!(payload = %payload, action = %action, "backend timed out");
            }
            SubmitOutcome::Network(reason) => {
                tracing::warn!(payload = %payload, reason = %reason, "backend unreachable");
            }
        }

        match self.gate {
            GateOutcome::Triggered => {}
            GateOutcome::NotTriggered => {
                tracing::warn!(payload = %payload, "gate not triggered, manual opening required");
            }
            GateOutcome::Skipped => {
                tracing::debug!(payload = %payload, "gate left closed");
            }
        }

        match &self.artifact {
            Ok(path) => tracing::info!(path = %path.display(), "detection image saved"),
            Err(e) => tracing::warn!(payload = %payload, error = %e, "failed to save detection image"),
        }
    }
}

/// Runs resolver, backend, actuator and artifact steps for each accepted
/// detection. Owns the cooldown registry.
pub struct DispatchCoordinator<A> {
    cooldown: CooldownRegistry,
    resolver: ActionResolver,
    backend: BackendClient,
    actuator: A,
    artifacts: ArtifactStore,
    status: Arc<RuntimeStatus>,
}

impl<A: Actuator> DispatchCoordinator<A> {
    pub fn new(
        cooldown: CooldownRegistry,
        backend: BackendClient,
        actuator: A,
        artifacts: ArtifactStore,
        status: Arc<RuntimeStatus>,
    ) -> Self {
        Self {
            cooldown,
            resolver: ActionResolver::new(backend.clone()),
            backend,
            actuator,
            artifacts,
            status,
        }
    }

    pub fn tracked_codes(&self) -> usize {
        self.cooldown.len()
    }

    /// Returns `None` when the payload is still cooling down.
    pub async fn dispatch(
        &self,
        event: &DetectionEvent,
        frame: &Mat,
        frame_events: &[DetectionEvent],
    ) -> Option<DispatchReport> {
        let payload = event.payload.as_str();

        if !self.cooldown.accept(payload, event.timestamp) {
            let remaining = self
                .cooldown
                .remaining(payload, event.timestamp)
                .unwrap_or_default();
            tracing::debug!(
                payload = %payload,
                remaining_secs = remaining.as_secs(),
                "code in cooldown, ignoring"
            );
            self.status.record_suppressed();
            return None;
        }

        let resolution = self.resolver.lookup(payload).await;
        let decision = resolution.decision();
        self.status.record_accepted(payload, decision);
        tracing::info!(payload = %payload, action = %decision, "dispatching detection");

        let submit = self.backend.submit_detection(payload, decision).await;

        let gate = if submit.is_accepted() {
            if self.actuator.trigger() {
                self.status.record_gate_trigger();
                GateOutcome::Triggered
            } else {
                GateOutcome::NotTriggered
            }
        } else {
            GateOutcome::Skipped
        };

        let artifact = self
            .save_artifact(frame, frame_events, payload, decision)
            .await;

        let report = DispatchReport {
            payload: payload.to_string(),
            resolution,
            decision,
            submit,
            gate,
            artifact,
        };
        report.log();
        Some(report)
    }

    /// Encodes and writes on the blocking pool.
    async fn save_artifact(
        &self,
        frame: &Mat,
        frame_events: &[DetectionEvent],
        payload: &str,
        decision: ActionDecision,
    ) -> Result<PathBuf, ArtifactError> {
        let store = self.artifacts.clone();
        let frame = frame.try_clone()?;
        let events = frame_events.to_vec();
        let payload = payload.to_string();
        let at = Local::now();
        tokio::task::spawn_blocking(move || store.persist(&frame, &events, &payload, decision, at))
            .await?
    }
}
