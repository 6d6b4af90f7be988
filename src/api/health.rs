use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    /// Gateway backends this process accepts payments for
    pub backends: Vec<String>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let backends: Vec<String> = state.backends().into_iter().map(str::to_string).collect();
    let status = if backends.is_empty() { "degraded" } else { "healthy" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.environment.clone(),
        backends,
    })
}
