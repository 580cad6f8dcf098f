//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::json::HealthResponse;
use crate::AppState;

/// Health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Enumeration is the cheapest call every backend supports.
    let backend_reachable = state.store.list_capabilities().await.is_ok();

    Json(HealthResponse {
        status: if backend_reachable { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.store.name().to_string(),
        backend_reachable,
    })
}
