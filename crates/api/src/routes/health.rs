//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "noteo",
        "version": env!("CARGO_PKG_VERSION"),
        "queue": {
            "state": format!("{:?}", state.queue.state()).to_lowercase(),
            "pending": state.queue.len(),
            "capacity": state.queue.capacity(),
            "dead_letters": state.queue.dead_letters().len(),
        }
    }))
}
