use std::fmt;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BackendConfig;

const DUPLICATE_MARKERS: [&str; 2] = ["duplicate key", "unique constraint"];

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url {0:?}")]
    InvalidUrl(String),
    #[error("request timed out")]
    Timeout,
    #[error("could not reach backend: {0}")]
    Connect(reqwest::Error),
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Connect(err)
        } else {
            BackendError::Request(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionDecision {
    Entry,
    Exit,
}

impl ActionDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionDecision::Entry => "entry",
            ActionDecision::Exit => "exit",
        }
    }
}

impl fmt::Display for ActionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleRecord {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub entrada: Option<String>,
    #[serde(default)]
    pub tempo_formatado: Option<String>,
    #[serde(default)]
    pub valor_atual: Option<f64>,
}

#[derive(Deserialize)]
struct VehicleEnvelope {
    #[serde(default)]
    veiculo: Option<VehicleRecord>,
}

#[derive(Debug)]
pub enum VehicleLookup {
    Found(VehicleRecord),
    Unknown(StatusCode),
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    qr_code: &'a str,
    action: ActionDecision,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectVehicle {
    #[serde(default)]
    pub valor_calculado: Option<f64>,
    #[serde(default)]
    pub tempo_permanencia_formatado: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub veiculo: Option<DetectVehicle>,
}

/// What the backend asks the client to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    OpenGate,
    ShowPayment {
        amount: f64,
        duration: Option<String>,
    },
    Other(String),
}

impl DetectResponse {
    pub fn follow_up(&self) -> Option<FollowUp> {
        let action = self.action.as_deref()?;
        Some(match action {
            "catraca_abrir" => FollowUp::OpenGate,
            "mostrar_pagamento" => {
                let vehicle = self.veiculo.clone().unwrap_or_default();
                FollowUp::ShowPayment {
                    amount: vehicle.valor_calculado.unwrap_or(0.0),
                    duration: vehicle.tempo_permanencia_formatado,
                }
            }
            other => FollowUp::Other(other.to_string()),
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Result of submitting one detection.
#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted(DetectResponse),
    /// The vehicle is already registered as parked.
    Conflict { message: Option<String> },
    ServerError {
        status: u16,
        duplicate: bool,
        body: String,
    },
    Rejected { status: u16, body: String },
    Malformed(String),
    Timeout,
    Network(String),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

/// HTTP client for the parking backend.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base: Url,
    lookup_timeout: Duration,
    submit_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base = Url::parse(&config.url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| BackendError::InvalidUrl(config.url.clone()))?;

        let client = reqwest::Client::builder()
            .user_agent(format!("qrgate/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BackendError::Request)?;

        Ok(Self {
            client,
            base,
            lookup_timeout: config.lookup_timeout(),
            submit_timeout: config.submit_timeout(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(self.endpoint(&["health"]))
            .timeout(self.lookup_timeout)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Status(response.status()))
        }
    }

    pub async fn vehicle(&self, code: &str) -> Result<VehicleLookup, BackendError> {
        let response = self
            .client
            .get(self.endpoint(&["api", "vehicle", code]))
            .timeout(self.lookup_timeout)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Ok(VehicleLookup::Unknown(status));
        }

        let envelope: VehicleEnvelope = response.json().await?;
        Ok(match envelope.veiculo {
            Some(record) => VehicleLookup::Found(record),
            None => VehicleLookup::Unknown(status),
        })
    }

    pub async fn submit_detection(&self, code: &str, action: ActionDecision) -> SubmitOutcome {
        let request = DetectRequest {
            qr_code: code,
            action,
        };

        let response = match self
            .client
            .post(self.endpoint(&["api", "detect"]))
            .timeout(self.submit_timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return transport_outcome(e),
        };

        let status = response.status();
        match status.as_u16() {
            200 | 201 => match response.json::<DetectResponse>().await {
                Ok(body) => SubmitOutcome::Accepted(body),
                Err(e) if e.is_timeout() => SubmitOutcome::Timeout,
                Err(e) => SubmitOutcome::Malformed(e.to_string()),
            },
            409 => {
                let message = response
                    .json::<ErrorBody>()
                    .await
                    .ok()
                    .and_then(|b| b.error);
                SubmitOutcome::Conflict { message }
            }
            500..=599 => {
                let body = response.text().await.unwrap_or_default();
                let duplicate = DUPLICATE_MARKERS.iter().any(|m| body.contains(m));
                SubmitOutcome::ServerError {
                    status: status.as_u16(),
                    duplicate,
                    body,
                }
            }
            _ => SubmitOutcome::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            },
        }
    }
}

fn transport_outcome(err: reqwest::Error) -> SubmitOutcome {
    if err.is_timeout() {
        SubmitOutcome::Timeout
    } else {
        SubmitOutcome::Network(err.to_string())
    }
}
