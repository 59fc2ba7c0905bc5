//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opencv::core::{Mat, Point2f, Scalar, CV_8UC3};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::actuator::Actuator;
use crate::camera::{Camera, CameraError, CaptureApi, FrameSource};
use crate::detection::{DetectionEvent, Decoder};

pub fn solid_frame() -> Mat {
    Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(127.0)).unwrap()
}

pub fn event_for(payload: &str, at: Instant) -> DetectionEvent {
    DetectionEvent::new(
        payload.to_string(),
        vec![
            Point2f::new(8.0, 8.0),
            Point2f::new(40.0, 8.0),
            Point2f::new(40.0, 40.0),
            Point2f::new(8.0, 40.0),
        ],
        at,
    )
    .unwrap()
}

/// URL of a local port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

struct MockState {
    vehicles: Mutex<HashMap<String, (u16, Value)>>,
    detect_response: Mutex<(u16, Value)>,
    delay: Mutex<Duration>,
    detect_requests: Mutex<Vec<Value>>,
    vehicle_lookups: Mutex<Vec<String>>,
}

impl MockState {
    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// In-process stand-in for the parking backend.
pub struct MockBackend {
    addr: std::net::SocketAddr,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            vehicles: Mutex::new(HashMap::new()),
            detect_response: Mutex::new((
                201,
                json!({"message": "Entrada registrada com sucesso", "action": "catraca_abrir"}),
            )),
            delay: Mutex::new(Duration::ZERO),
            detect_requests: Mutex::new(Vec::new()),
            vehicle_lookups: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/api/vehicle/{code}", get(vehicle))
            .route("/api/detect", post(detect))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_vehicle(&self, code: &str, status: u16, body: Value) {
        self.state
            .vehicles
            .lock()
            .unwrap()
            .insert(code.to_string(), (status, body));
    }

    pub fn set_detect_response(&self, status: u16, body: Value) {
        *self.state.detect_response.lock().unwrap() = (status, body);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn detect_requests(&self) -> Vec<Value> {
        self.state.detect_requests.lock().unwrap().clone()
    }

    pub fn vehicle_lookups(&self) -> Vec<String> {
        self.state.vehicle_lookups.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn respond(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

async fn health(State(state): State<Arc<MockState>>) -> Response {
    state.pause().await;
    respond(200, json!({"status": "OK"}))
}

async fn vehicle(State(state): State<Arc<MockState>>, Path(code): Path<String>) -> Response {
    state.pause().await;
    state.vehicle_lookups.lock().unwrap().push(code.clone());
    let entry = state.vehicles.lock().unwrap().get(&code).cloned();
    match entry {
        Some((status, body)) => respond(status, body),
        None => respond(404, json!({"error": "Veículo não encontrado"})),
    }
}

async fn detect(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.pause().await;
    state.detect_requests.lock().unwrap().push(body);
    let (status, body) = state.detect_response.lock().unwrap().clone();
    respond(status, body)
}

/// Records trigger calls and reports a fixed connection state.
pub struct CountingActuator {
    connected: bool,
    calls: AtomicUsize,
}

impl CountingActuator {
    pub fn new(connected: bool) -> Self {
        Self {
            connected,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Actuator for CountingActuator {
    fn trigger(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.connected
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ReadStep {
    Frame,
    /// The read reports success but the frame is empty.
    Empty,
    /// The device reports no frame.
    Fail,
    Error,
    /// Blocks the reading thread, then delivers a frame.
    Stall(Duration),
}

/// Camera whose sessions replay one shared script of read results. Once the
/// script is exhausted every read fails.
pub struct ScriptedCamera {
    script: Arc<Mutex<VecDeque<ReadStep>>>,
    apis: Vec<CaptureApi>,
    failing: HashSet<CaptureApi>,
    fail_reopen: bool,
    opened: Arc<AtomicUsize>,
    open_log: Arc<Mutex<Vec<CaptureApi>>>,
}

impl ScriptedCamera {
    pub fn new(steps: Vec<ReadStep>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into())),
            apis: vec![CaptureApi::V4l2, CaptureApi::Any],
            failing: HashSet::new(),
            fail_reopen: false,
            opened: Arc::new(AtomicUsize::new(0)),
            open_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_apis(mut self, apis: Vec<CaptureApi>) -> Self {
        self.apis = apis;
        self
    }

    pub fn failing_open(mut self, api: CaptureApi) -> Self {
        self.failing.insert(api);
        self
    }

    /// Every open after the first successful one fails.
    pub fn failing_reopen(mut self) -> Self {
        self.fail_reopen = true;
        self
    }

    pub fn open_log(&self) -> Arc<Mutex<Vec<CaptureApi>>> {
        Arc::clone(&self.open_log)
    }
}

impl Camera for ScriptedCamera {
    type Session = ScriptedSession;

    fn open(&self, api: CaptureApi) -> Result<ScriptedSession, CameraError> {
        self.open_log.lock().unwrap().push(api);
        let refused = self.failing.contains(&api)
            || (self.fail_reopen && self.opened.load(Ordering::SeqCst) > 0);
        if refused {
            return Err(CameraError::NotOpened { index: 0, api });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            script: Arc::clone(&self.script),
        })
    }

    fn index(&self) -> i32 {
        0
    }

    fn apis(&self) -> Vec<CaptureApi> {
        self.apis.clone()
    }
}

pub struct ScriptedSession {
    script: Arc<Mutex<VecDeque<ReadStep>>>,
}

impl FrameSource for ScriptedSession {
    fn read_frame(&mut self, frame: &mut Mat) -> Result<bool, CameraError> {
        let step = self.script.lock().unwrap().pop_front().unwrap_or(ReadStep::Fail);
        match step {
            ReadStep::Frame => {
                *frame = solid_frame();
                Ok(true)
            }
            ReadStep::Empty => {
                *frame = Mat::default();
                Ok(true)
            }
            ReadStep::Stall(delay) => {
                std::thread::sleep(delay);
                *frame = solid_frame();
                Ok(true)
            }
            ReadStep::Fail => Ok(false),
            ReadStep::Error => Err(CameraError::OpenCv(opencv::Error::new(
                opencv::core::StsError,
                "device lost",
            ))),
        }
    }
}

/// Returns the scripted payloads for each decoded frame, in order.
pub struct ScriptedDecoder {
    frames: VecDeque<Vec<&'static str>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDecoder {
    pub fn new(frames: Vec<Vec<&'static str>>) -> Self {
        Self {
            frames: frames.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(&mut self, _frame: &Mat) -> Vec<DetectionEvent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        self.frames
            .pop_front()
            .unwrap_or_default()
            .into_iter()
            .map(|payload| event_for(payload, now))
            .collect()
    }
}
