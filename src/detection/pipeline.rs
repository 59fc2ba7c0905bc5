use std::sync::Arc;
use std::time::Duration;

use opencv::core::Mat;

use crate::actuator::Actuator;
use crate::camera::{has_pixels, Camera, CameraError, CaptureApi, FrameSource};
use crate::config::CameraConfig;
use crate::dispatch::DispatchCoordinator;
use crate::status::RuntimeStatus;

use super::decoder::{Decoder, DetectionEvent};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub frame_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnects: u32,
    pub heartbeat_frames: u64,
}

impl From<&CameraConfig> for LoopSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_reconnects: config.max_reconnects,
            heartbeat_frames: config.heartbeat_frames.max(1),
        }
    }
}

/// Device session, decoder and frame buffer. Every call into it blocks, so it
/// is moved onto the blocking pool for each step.
struct FrameWorker<S, D> {
    session: Option<S>,
    decoder: D,
    frame: Mat,
}

impl<S: FrameSource, D: Decoder> FrameWorker<S, D> {
    /// Reads one frame and decodes it. `None` means the read failed.
    fn step(&mut self) -> Option<Vec<DetectionEvent>> {
        let session = self.session.as_mut()?;
        match session.read_frame(&mut self.frame) {
            Ok(true) if has_pixels(&self.frame) => Some(self.decoder.decode(&self.frame)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "frame read error");
                None
            }
        }
    }
}

/// Owns the camera and drives capture → decode → dispatch, one frame at a
/// time, in capture order.
pub struct DetectionLoop<C: Camera, D, A> {
    camera: Arc<C>,
    worker: Option<FrameWorker<C::Session, D>>,
    default_api: CaptureApi,
    coordinator: DispatchCoordinator<A>,
    settings: LoopSettings,
    status: Arc<RuntimeStatus>,
    frame_count: u64,
}

impl<C, D, A> DetectionLoop<C, D, A>
where
    C: Camera + Send + Sync + 'static,
    C::Session: Send + 'static,
    D: Decoder + Send + 'static,
    A: Actuator,
{
    /// Opens the camera with the first backend that both opens the device and
    /// delivers a frame. Blocks on the device.
    pub fn start(
        camera: C,
        decoder: D,
        coordinator: DispatchCoordinator<A>,
        settings: LoopSettings,
        status: Arc<RuntimeStatus>,
    ) -> Result<Self, CameraError> {
        let apis = camera.apis();
        let default_api = apis.first().copied().unwrap_or(CaptureApi::Any);

        let mut session = None;
        for api in apis {
            tracing::info!(backend = %api, "trying capture backend");
            let mut candidate = match camera.open(api) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(backend = %api, error = %e, "capture backend failed");
                    continue;
                }
            };

            let mut probe = Mat::default();
            match candidate.read_frame(&mut probe) {
                Ok(true) if has_pixels(&probe) => {
                    tracing::info!(backend = %api, "camera ready");
                    session = Some(candidate);
                    break;
                }
                Ok(_) => {
                    tracing::warn!(backend = %api, "camera opened but delivered no frame");
                }
                Err(e) => {
                    tracing::warn!(backend = %api, error = %e, "camera opened but frame read failed");
                }
            }
        }

        let Some(session) = session else {
            return Err(CameraError::NoBackend(camera.index()));
        };

        Ok(Self {
            camera: Arc::new(camera),
            worker: Some(FrameWorker {
                session: Some(session),
                decoder,
                frame: Mat::default(),
            }),
            default_api,
            coordinator,
            settings,
            status,
            frame_count: 0,
        })
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_count
    }

    /// Runs until the camera fails beyond recovery. Reads and decodes run on
    /// the blocking pool, so dropping this future never waits on the driver;
    /// the session is released once the in-flight read returns.
    pub async fn run(&mut self) -> Result<(), CameraError> {
        let mut worker = self.worker.take().ok_or(CameraError::Closed)?;
        let mut consecutive_failures: u32 = 0;

        loop {
            let (returned, step) = tokio::task::spawn_blocking(move || {
                let step = worker.step();
                (worker, step)
            })
            .await?;
            worker = returned;

            let Some(events) = step else {
                consecutive_failures += 1;
                tracing::warn!(
                    frame = self.frame_count,
                    failures = consecutive_failures,
                    "failed to read frame, camera may be disconnected"
                );
                if consecutive_failures > self.settings.max_reconnects {
                    tracing::error!(
                        attempts = self.settings.max_reconnects,
                        "camera did not recover"
                    );
                    return Err(CameraError::ReconnectLimit(self.settings.max_reconnects));
                }
                worker.session = Some(self.reconnect(worker.session.take()).await?);
                continue;
            };
            consecutive_failures = 0;

            self.frame_count += 1;
            self.status.record_frame();
            self.dispatch_events(&worker.frame, events).await;

            if self.frame_count % self.settings.heartbeat_frames == 0 {
                let snapshot = self.status.snapshot();
                tracing::info!(
                    frames = self.frame_count,
                    accepted = snapshot.accepted,
                    suppressed = snapshot.suppressed,
                    gate_triggers = snapshot.gate_triggers,
                    tracked_codes = self.coordinator.tracked_codes(),
                    "detector alive"
                );
            }

            tokio::time::sleep(self.settings.frame_interval).await;
        }
    }

    /// Releases the stale session, waits, then reopens on the default backend.
    async fn reconnect(&self, stale: Option<C::Session>) -> Result<C::Session, CameraError> {
        if let Some(stale) = stale {
            tokio::task::spawn_blocking(move || drop(stale)).await?;
        }
        tracing::info!(
            delay_ms = self.settings.reconnect_delay.as_millis() as u64,
            backend = %self.default_api,
            "reconnecting camera"
        );
        tokio::time::sleep(self.settings.reconnect_delay).await;
        self.status.record_reconnect();

        let camera = Arc::clone(&self.camera);
        let api = self.default_api;
        match tokio::task::spawn_blocking(move || camera.open(api)).await? {
            Ok(session) => {
                tracing::info!("camera reconnected");
                Ok(session)
            }
            Err(e) => {
                tracing::error!(error = %e, "camera could not be reopened");
                Err(CameraError::ReopenFailed(Box::new(e)))
            }
        }
    }

    async fn dispatch_events(&self, frame: &Mat, events: Vec<DetectionEvent>) {
        if events.is_empty() {
            return;
        }

        self.status.record_detections(events.len());
        tracing::info!(frame = self.frame_count, codes = events.len(), "codes detected");

        for event in &events {
            self.coordinator.dispatch(event, frame, &events).await;
        }
    }
}
