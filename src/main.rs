use std::sync::Arc;

use tracing_subscriber::EnvFilter;

mod actuator;
mod api;
mod camera;
mod config;
mod detection;
mod dispatch;
mod status;
mod storage;
#[cfg(test)]
mod testing;

use actuator::{spawn_supervisor, ActuatorSession};
use api::AppState;
use camera::UsbCamera;
use config::Config;
use detection::{CooldownRegistry, DetectionLoop, LoopSettings, QrDecoder};
use dispatch::{BackendClient, DispatchCoordinator};
use status::RuntimeStatus;
use storage::ArtifactStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("qrgate=debug".parse()?))
        .init();

    let config = Config::load()?;
    tracing::info!(
        backend = %config.backend.url,
        camera = config.camera.index,
        cooldown_secs = config.detection.cooldown_secs,
        "configuration loaded"
    );

    let status = Arc::new(RuntimeStatus::default());
    let artifacts = ArtifactStore::create(&config.artifacts.dir)?;
    tracing::info!(dir = %artifacts.dir().display(), "saving detection snapshots");

    let backend = BackendClient::new(&config.backend)?;
    match backend.health().await {
        Ok(()) => tracing::info!(url = %backend.base_url(), "backend reachable"),
        Err(e) => tracing::warn!(
            url = %backend.base_url(),
            error = %e,
            "backend health check failed, detections will still be submitted"
        ),
    }

    let actuator = Arc::new(ActuatorSession::new(config.mqtt.clone()));
    let cooldown = CooldownRegistry::new(
        config.detection.cooldown(),
        config.detection.max_tracked_codes,
    );
    tracing::debug!(window_secs = cooldown.window().as_secs(), "cooldown registry ready");

    let coordinator = DispatchCoordinator::new(
        cooldown,
        backend,
        Arc::clone(&actuator),
        artifacts,
        Arc::clone(&status),
    );

    let camera = UsbCamera::new(&config.camera);
    let decoder = QrDecoder::new()?;
    let settings = LoopSettings::from(&config.camera);
    let loop_status = Arc::clone(&status);
    let started = tokio::task::spawn_blocking(move || {
        DetectionLoop::start(camera, decoder, coordinator, settings, loop_status)
    })
    .await?;

    let mut detector = match started {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(camera = config.camera.index, error = %e, "could not start camera");
            tracing::error!("check that the camera is connected and not in use by another program");
            tracing::error!("try a different CAMERA_INDEX (0, 1, 2, ...)");
            return Err(e.into());
        }
    };

    let supervisor = if config.mqtt.enabled {
        if !actuator.connect().await {
            tracing::warn!("broker unavailable, gate will not open until it reconnects");
        }
        Some(spawn_supervisor(
            Arc::clone(&actuator),
            config.mqtt.reconnect_interval(),
        ))
    } else {
        tracing::info!("gate control disabled");
        None
    };

    let server = if config.http.enabled {
        let state = AppState::new(Arc::clone(&status), Arc::clone(&actuator));
        let port = config.http.port;
        Some(tokio::spawn(async move {
            if let Err(e) = api::start_server(state, port).await {
                tracing::error!("status server error: {}", e);
            }
        }))
    } else {
        None
    };

    tracing::info!("detector running, press Ctrl+C to stop");

    let outcome = tokio::select! {
        result = detector.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    if let Err(e) = &outcome {
        tracing::error!(error = %e, "detection loop stopped");
    }

    let snapshot = status.snapshot();
    tracing::info!(
        frames = detector.frames_processed(),
        accepted = snapshot.accepted,
        gate_triggers = snapshot.gate_triggers,
        "final detector stats"
    );
    // The capture session went with the run future, or with its blocking task
    // once an in-flight read returns.
    drop(detector);

    if let Some(handle) = supervisor {
        handle.abort();
    }
    actuator.disconnect().await;
    if let Some(handle) = server {
        handle.abort();
    }

    tracing::info!("shutdown complete");
    outcome.map_err(Into::into)
}
