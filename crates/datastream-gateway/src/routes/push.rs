//! Push endpoint.

use axum::{extract::State, routing::post, Json, Router};
use datastream_core::Record;

use crate::error::AppError;
use crate::json::{RecordJson, SuccessResponse};
use crate::AppState;

/// Push routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/push", post(handle_push))
}

/// Write a new value for one key.
async fn handle_push(
    State(state): State<AppState>,
    Json(body): Json<RecordJson>,
) -> Result<Json<SuccessResponse>, AppError> {
    let record = Record::try_from(body)?;
    state.store.push_update(&record).await?;
    Ok(Json(SuccessResponse::new()))
}
