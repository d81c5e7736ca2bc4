//! Event ingestion: producers post an event body with their project token.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use noteo_common::error::AppError;
use noteo_engine::gate::FanOutError;

use crate::middleware::auth::ProjectToken;
use crate::state::AppState;

/// Telegram refuses message text longer than this many characters.
pub const MAX_EVENT_CHARS: usize = 4096;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notify", post(notify))
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub body: String,
}

fn validate_body(body: &str) -> Result<(), AppError> {
    if body.trim().is_empty() {
        return Err(AppError::Validation("Event body must not be empty".to_string()));
    }
    let chars = body.chars().count();
    if chars > MAX_EVENT_CHARS {
        return Err(AppError::Validation(format!(
            "Event body is {} characters, the limit is {}",
            chars, MAX_EVENT_CHARS
        )));
    }
    Ok(())
}

/// POST /api/notify: Fan an event out to the project's subscribers.
async fn notify(
    State(state): State<AppState>,
    ProjectToken(project): ProjectToken,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    validate_body(&request.body)?;

    let subscriptions = state
        .subscriptions
        .project_subscriptions(project.id)
        .await
        .map_err(|e| {
            tracing::error!(project_id = %project.id, error = %e, "Subscription lookup failed");
            AppError::Internal("Failed to load subscriptions".to_string())
        })?;

    let report = match state.gate.fan_out(&subscriptions, &request.body) {
        Ok(report) => report,
        Err(e @ FanOutError::CapacityExceeded { queued, total }) => {
            tracing::error!(
                project_id = %project.id,
                queued,
                total,
                "Delivery queue full, event partially dropped"
            );
            return Err(e.into());
        }
    };

    if report.queued == 0 && report.rejected > 0 {
        tracing::error!(
            project_id = %project.id,
            rejected = report.rejected,
            "Delivery queue not accepting messages"
        );
        return Err(AppError::Unavailable(
            "Delivery queue is not accepting messages".to_string(),
        ));
    }

    tracing::info!(
        project_id = %project.id,
        queued = report.queued,
        skipped_paused = report.skipped_paused,
        rejected = report.rejected,
        "Event accepted"
    );

    Ok(Json(json!({ "queued": report.queued })))
}
