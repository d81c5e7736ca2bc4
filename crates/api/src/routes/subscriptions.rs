//! Subscription management routes. The caller is always the recipient.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use noteo_common::error::AppError;
use noteo_common::types::Subscription;
use noteo_engine::subscription::DEFAULT_PAUSE_HOURS;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// Longest pause accepted over the API: one year.
const MAX_PAUSE_HOURS: i64 = 24 * 365;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/subscriptions", post(subscribe))
        .route("/api/subscriptions", get(list_subscriptions))
        .route("/api/subscriptions/{project_id}", delete(unsubscribe))
        .route("/api/subscriptions/{project_id}/mute", post(mute))
        .route("/api/subscriptions/{project_id}/unmute", post(unmute))
        .route("/api/subscriptions/{project_id}/pause", post(pause))
        .route("/api/subscriptions/{project_id}/resume", post(resume))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    pub project_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct PauseParams {
    pub hours: Option<i64>,
}

/// A subscription plus its pause state as of the response.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub paused: bool,
}

impl From<Subscription> for SubscriptionView {
    fn from(subscription: Subscription) -> Self {
        let paused = subscription.is_paused();
        Self {
            subscription,
            paused,
        }
    }
}

/// POST /api/subscriptions: Subscribe the caller to a project.
async fn subscribe(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(params): Json<SubscribeParams>,
) -> Result<Json<SubscriptionView>, AppError> {
    let sub = state
        .subscriptions
        .subscribe(auth.recipient_id, params.project_id)
        .await?;
    Ok(Json(sub.into()))
}

/// GET /api/subscriptions: List the caller's subscriptions, paused ones included.
async fn list_subscriptions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<SubscriptionView>>, AppError> {
    let subs = state
        .subscriptions
        .recipient_subscriptions(auth.recipient_id)
        .await?;
    Ok(Json(subs.into_iter().map(SubscriptionView::from).collect()))
}

/// DELETE /api/subscriptions/:project_id: Unsubscribe.
async fn unsubscribe(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .subscriptions
        .unsubscribe(auth.recipient_id, project_id)
        .await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

async fn mute(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<SubscriptionView>, AppError> {
    let sub = state
        .subscriptions
        .mute(auth.recipient_id, project_id)
        .await?;
    Ok(Json(sub.into()))
}

async fn unmute(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<SubscriptionView>, AppError> {
    let sub = state
        .subscriptions
        .unmute(auth.recipient_id, project_id)
        .await?;
    Ok(Json(sub.into()))
}

/// POST /api/subscriptions/:project_id/pause: Pause for `hours` (default 24).
///
/// The body is optional; an empty body uses the default.
async fn pause(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<SubscriptionView>, AppError> {
    let params: PauseParams = if body.is_empty() {
        PauseParams::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid pause request: {}", e)))?
    };

    let hours = params.hours.unwrap_or(DEFAULT_PAUSE_HOURS);
    if !(1..=MAX_PAUSE_HOURS).contains(&hours) {
        return Err(AppError::Validation(format!(
            "hours must be between 1 and {}",
            MAX_PAUSE_HOURS
        )));
    }

    let sub = state
        .subscriptions
        .pause_for(auth.recipient_id, project_id, Duration::hours(hours))
        .await?;
    Ok(Json(sub.into()))
}

async fn resume(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<SubscriptionView>, AppError> {
    let sub = state
        .subscriptions
        .resume(auth.recipient_id, project_id)
        .await?;
    Ok(Json(sub.into()))
}
