use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    handlers: usize,
    signature_checks: bool,
}

impl HealthState {
    pub fn new(handlers: usize, signature_checks: bool) -> Self {
        Self { handlers, signature_checks }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub events: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let events = events_check(&state);
    let ready = events.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "mentionbot-server runtime initialized".to_string(),
        },
        events,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn events_check(state: &HealthState) -> HealthCheck {
    if state.handlers == 0 {
        return HealthCheck {
            status: "degraded",
            detail: "no event handlers registered".to_string(),
        };
    }

    let verification = if state.signature_checks { "verified" } else { "unverified" };
    HealthCheck {
        status: "ready",
        detail: format!("{} event handler(s) registered, {verification} requests", state.handlers),
    }
}
