//! Datastream HTTP/JSON Gateway.
//!
//! Exposes one backend's capability contract to remote callers: request and
//! response routes for enumerate, pull and push, and a server-sent-events
//! stream for subscribe.

pub mod backend;
pub mod config;
pub mod error;
pub mod json;
pub mod routes;

pub use backend::open_backend;
pub use config::{Args, BackendKind, BackendSettings, GatewayConfig};
pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use datastream_core::{SharedStore, Store};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Backend serving the keys.
    pub store: SharedStore,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: impl Store + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::capabilities::routes())
        .merge(routes::pull::routes())
        .merge(routes::subscribe::routes())
        .merge(routes::push::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
