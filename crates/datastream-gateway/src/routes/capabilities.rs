//! Capability enumeration endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::error::AppError;
use crate::json::CapabilitiesResponse;
use crate::AppState;

/// Capability routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/capabilities", get(list_capabilities))
}

async fn list_capabilities(
    State(state): State<AppState>,
) -> Result<Json<CapabilitiesResponse>, AppError> {
    let capabilities = state.store.list_capabilities().await?;
    Ok(Json(CapabilitiesResponse { capabilities }))
}
