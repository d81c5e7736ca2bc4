//! Persistence boundary for projects and subscriptions.
//!
//! Services take these traits as `Arc<dyn ...>` so the same code runs against
//! Postgres in production and the in-memory store in tests and `:memory:` mode.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use noteo_common::error::AppError;
use noteo_common::types::{Project, RecipientId, Subscription};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a new project. Duplicate token or (publisher, name) is a `Conflict`.
    async fn insert_project(&self, project: &Project) -> Result<(), AppError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError>;

    async fn get_project_by_token(&self, token: &str) -> Result<Option<Project>, AppError>;

    async fn list_projects_by_publisher(
        &self,
        publisher_id: RecipientId,
    ) -> Result<Vec<Project>, AppError>;

    async fn update_project_name(&self, id: Uuid, name: &str) -> Result<Project, AppError>;

    async fn update_project_token(&self, id: Uuid, token: &str) -> Result<Project, AppError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a subscription, or return the existing one for the same
    /// (recipient, project) pair unchanged.
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError>;

    /// Hard delete. Returns whether a row existed.
    async fn delete_subscription(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
    ) -> Result<bool, AppError>;

    async fn get_subscription(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;

    /// All subscriptions of a project, paused ones included.
    async fn list_subscriptions_by_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Subscription>, AppError>;

    async fn list_subscriptions_by_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<Subscription>, AppError>;

    /// Update only the `muted` column.
    async fn set_muted(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
        muted: bool,
    ) -> Result<Subscription, AppError>;

    /// Update only the `paused_until` column.
    async fn set_paused_until(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
        paused_until: Option<DateTime<Utc>>,
    ) -> Result<Subscription, AppError>;
}

fn subscription_not_found(recipient_id: RecipientId, project_id: Uuid) -> AppError {
    AppError::NotFound(format!(
        "Subscription of {} to project {} not found",
        recipient_id, project_id
    ))
}

fn project_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Project {} not found", id))
}
