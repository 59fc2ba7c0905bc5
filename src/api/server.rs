use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::actuator::{ActuatorSession, ConnectionState};
use crate::status::{RuntimeStatus, StatusSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub status: Arc<RuntimeStatus>,
    pub actuator: Arc<ActuatorSession>,
}

impl AppState {
    pub fn new(status: Arc<RuntimeStatus>, actuator: Arc<ActuatorSession>) -> Self {
        Self { status, actuator }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    counters: StatusSnapshot,
    broker: ConnectionState,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("starting status server on http://{}", addr);
    serve(listener, state).await
}

async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        counters: state.status.snapshot(),
        broker: state.actuator.state(),
    })
}
