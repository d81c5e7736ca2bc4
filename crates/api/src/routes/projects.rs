//! Project management routes. The caller is always the publisher.

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use noteo_common::error::AppError;
use noteo_common::types::Project;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/projects", post(create_project))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{id}", patch(rename_project))
        .route("/api/projects/{id}/token", post(regenerate_token))
}

#[derive(Debug, Deserialize)]
pub struct ProjectNameParams {
    pub name: String,
}

/// POST /api/projects: Create a project owned by the caller.
async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(params): Json<ProjectNameParams>,
) -> Result<Json<Project>, AppError> {
    let project = state
        .projects
        .create(auth.recipient_id, &params.name)
        .await?;
    Ok(Json(project))
}

/// GET /api/projects: List the caller's projects.
async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Project>>, AppError> {
    let projects = state.projects.list_by_publisher(auth.recipient_id).await?;
    Ok(Json(projects))
}

/// PATCH /api/projects/:id: Rename a project.
async fn rename_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(params): Json<ProjectNameParams>,
) -> Result<Json<Project>, AppError> {
    let project = state
        .projects
        .rename(id, auth.recipient_id, &params.name)
        .await?;
    Ok(Json(project))
}

/// POST /api/projects/:id/token: Issue a new delivery token.
async fn regenerate_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = state
        .projects
        .regenerate_token(id, auth.recipient_id)
        .await?;
    Ok(Json(json!({ "token": token })))
}
