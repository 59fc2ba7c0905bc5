use reqwest::StatusCode;

use super::backend::{ActionDecision, BackendClient, VehicleLookup};

/// Status values the backend uses for a vehicle that is currently parked.
const PARKED_STATUSES: [&str; 2] = ["ativo", "active"];

/// How an action was chosen for a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The backend reports the vehicle as parked.
    Parked,
    /// The backend knows the vehicle under another status.
    NotParked(String),
    NotFound(StatusCode),
    /// The lookup failed and entry was assumed.
    Fallback(String),
}

impl Resolution {
    pub fn decision(&self) -> ActionDecision {
        match self {
            Resolution::Parked => ActionDecision::Exit,
            Resolution::NotParked(_) | Resolution::NotFound(_) | Resolution::Fallback(_) => {
                ActionDecision::Entry
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback(_))
    }
}

/// Picks entry or exit for a payload from the vehicle's remote status. A
/// failed lookup is indistinguishable from an unknown vehicle and resolves
/// to entry; the backend re-validates on submission.
#[derive(Clone)]
pub struct ActionResolver {
    backend: BackendClient,
}

impl ActionResolver {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    #[allow(dead_code)]
    pub async fn resolve(&self, payload: &str) -> ActionDecision {
        self.lookup(payload).await.decision()
    }

    pub async fn lookup(&self, payload: &str) -> Resolution {
        match self.backend.vehicle(payload).await {
            Ok(VehicleLookup::Found(record)) => {
                if PARKED_STATUSES.contains(&record.status.as_str()) {
                    tracing::debug!(
                        payload = %payload,
                        since = record.entrada.as_deref().unwrap_or("-"),
                        elapsed = record.tempo_formatado.as_deref().unwrap_or("-"),
                        amount = record.valor_atual.unwrap_or(0.0),
                        "vehicle is parked"
                    );
                    Resolution::Parked
                } else {
                    Resolution::NotParked(record.status)
                }
            }
            Ok(VehicleLookup::Unknown(status)) => Resolution::NotFound(status),
            Err(e) => {
                tracing::warn!(
                    payload = %payload,
                    error = %e,
                    "vehicle lookup failed, assuming entry"
                );
                Resolution::Fallback(e.to_string())
            }
        }
    }
}
