//! Project service: publisher-owned event sources and their delivery tokens.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use noteo_common::error::AppError;
use noteo_common::types::{Project, RecipientId};

use crate::store::ProjectStore;

/// Maximum project name length, in characters.
pub const MAX_NAME_LEN: usize = 64;

#[derive(Clone)]
pub struct ProjectService {
    store: Arc<dyn ProjectStore>,
}

impl ProjectService {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    /// Create a project owned by `publisher` with a fresh delivery token.
    pub async fn create(&self, publisher: RecipientId, name: &str) -> Result<Project, AppError> {
        let name = validate_name(name)?;
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name,
            publisher_id: publisher,
            token: generate_token(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_project(&project).await?;

        tracing::info!(
            project_id = %project.id,
            publisher_id = %publisher,
            name = %project.name,
            "Project created"
        );

        Ok(project)
    }

    pub async fn get(&self, id: Uuid) -> Result<Project, AppError> {
        self.store
            .get_project(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))
    }

    /// Resolve a delivery token. `None` means the token is unknown.
    pub async fn get_by_token(&self, token: &str) -> Result<Option<Project>, AppError> {
        self.store.get_project_by_token(token).await
    }

    pub async fn list_by_publisher(
        &self,
        publisher: RecipientId,
    ) -> Result<Vec<Project>, AppError> {
        self.store.list_projects_by_publisher(publisher).await
    }

    pub async fn rename(
        &self,
        id: Uuid,
        publisher: RecipientId,
        name: &str,
    ) -> Result<Project, AppError> {
        let name = validate_name(name)?;
        self.owned(id, publisher).await?;

        let project = self.store.update_project_name(id, &name).await?;
        tracing::info!(project_id = %id, name = %project.name, "Project renamed");
        Ok(project)
    }

    /// Replace the delivery token. The old token stops resolving immediately.
    pub async fn regenerate_token(
        &self,
        id: Uuid,
        publisher: RecipientId,
    ) -> Result<String, AppError> {
        self.owned(id, publisher).await?;

        let project = self.store.update_project_token(id, &generate_token()).await?;
        tracing::info!(project_id = %id, "Project token regenerated");
        Ok(project.token)
    }

    async fn owned(&self, id: Uuid, publisher: RecipientId) -> Result<Project, AppError> {
        let project = self.get(id).await?;
        if project.publisher_id != publisher {
            return Err(AppError::Forbidden(
                "Not authorized to modify this project".to_string(),
            ));
        }
        Ok(project)
    }
}

fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Project name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Project name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}
