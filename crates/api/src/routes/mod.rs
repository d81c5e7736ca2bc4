pub mod health;
pub mod notify;
pub mod projects;
pub mod subscriptions;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(notify::router())
        .merge(projects::router())
        .merge(subscriptions::router())
        .with_state(state)
}
