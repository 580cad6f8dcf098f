//! Subscribe endpoint, streamed as server-sent events.
//!
//! Each changed record is an `update` event carrying a [`RecordJson`]. A
//! fatal backend error is sent as a final `error` event before the stream
//! closes. Dropping the connection drops the subscription, which stops the
//! backend's poll loop.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;

use datastream_core::{Record, Result};

use crate::error::AppError;
use crate::json::RecordJson;
use crate::AppState;

/// Subscribe routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/subscribe", get(handle_subscribe))
}

/// Query parameters: a comma separated key list.
#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    /// Keys to watch, e.g. `keys=a.json,b.json`.
    #[serde(default)]
    pub keys: String,
}

impl SubscribeParams {
    fn keys(&self) -> Vec<String> {
        self.keys
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn to_event(item: Result<Record>) -> std::result::Result<Event, Infallible> {
    let event = match item {
        Ok(record) => {
            let key = record.key.clone();
            match Event::default()
                .event("update")
                .json_data(RecordJson::from(record))
            {
                Ok(event) => event,
                Err(e) => Event::default()
                    .event("error")
                    .data(format!("failed to encode record {}: {}", key, e)),
            }
        }
        Err(e) => Event::default().event("error").data(e.to_string()),
    };
    Ok(event)
}

async fn handle_subscribe(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, AppError>
{
    let keys = params.keys();
    if keys.is_empty() {
        return Err(AppError::BadRequest("at least one key is required".to_string()));
    }

    let subscription = state.store.subscribe(&keys).await?;
    tracing::debug!(keys = ?keys, "subscription stream opened");

    Ok(Sse::new(subscription.map(to_event)).keep_alive(KeepAlive::default()))
}
