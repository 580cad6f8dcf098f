//! Pull endpoint.

use axum::{extract::State, routing::post, Json, Router};

use crate::error::AppError;
use crate::json::{PullRequest, PullResponse};
use crate::AppState;

/// Pull routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/pull", post(handle_pull))
}

/// Fetch the current value of each requested key.
async fn handle_pull(
    State(state): State<AppState>,
    Json(request): Json<PullRequest>,
) -> Result<Json<PullResponse>, AppError> {
    let records = state.store.pull(&request.keys).await?;
    Ok(Json(records.into()))
}
