//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: String,
    pub database: String,
}

/// Overall status for a given store connectivity
fn overall_status(connected: bool) -> &'static str {
    if connected {
        "healthy"
    } else {
        "degraded"
    }
}

/// Health check endpoint handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = match state.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "store ping failed");
            false
        }
    };

    Json(HealthResponse {
        status: overall_status(connected).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.config.storage.as_str().to_string(),
        database: if connected { "connected" } else { "disconnected" }.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_connectivity() {
        assert_eq!(overall_status(true), "healthy");
        assert_eq!(overall_status(false), "degraded");
    }
}
