//! Route configuration.

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::state::AppState;
use crate::assistant::assistant_handler;
use crate::ws::{client_ws_handler, hub_ws_handler};

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/connect", get(hub_ws_handler))
        .route("/connectClient", get(client_ws_handler))
        .route("/", post(assistant_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
