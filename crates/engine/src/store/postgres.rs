use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use noteo_common::error::AppError;
use noteo_common::types::{Project, RecipientId, Subscription};

use super::{ProjectStore, SubscriptionStore, project_not_found, subscription_not_found};

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map unique-constraint violations to `Conflict`, everything else to `Database`.
fn map_unique(err: sqlx::Error, conflict: impl FnOnce() -> String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(conflict()),
        _ => AppError::Database(err),
    }
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn insert_project(&self, project: &Project) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, publisher_id, token, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(project.publisher_id)
        .bind(&project.token)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, || format!("Project '{}' already exists", project.name)))?;

        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        let project = sqlx::query_as("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    async fn get_project_by_token(&self, token: &str) -> Result<Option<Project>, AppError> {
        let project = sqlx::query_as("SELECT * FROM projects WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    async fn list_projects_by_publisher(
        &self,
        publisher_id: RecipientId,
    ) -> Result<Vec<Project>, AppError> {
        let projects = sqlx::query_as(
            "SELECT * FROM projects WHERE publisher_id = $1 ORDER BY created_at, id",
        )
        .bind(publisher_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    async fn update_project_name(&self, id: Uuid, name: &str) -> Result<Project, AppError> {
        let project: Option<Project> = sqlx::query_as(
            "UPDATE projects SET name = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique(e, || format!("Project '{}' already exists", name)))?;

        project.ok_or_else(|| project_not_found(id))
    }

    async fn update_project_token(&self, id: Uuid, token: &str) -> Result<Project, AppError> {
        let project: Option<Project> = sqlx::query_as(
            "UPDATE projects SET token = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(token)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique(e, || "Project token already in use".to_string()))?;

        project.ok_or_else(|| project_not_found(id))
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError> {
        let inserted: Option<Subscription> = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (id, recipient_id, project_id, muted, paused_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (recipient_id, project_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.recipient_id)
        .bind(subscription.project_id)
        .bind(subscription.muted)
        .bind(subscription.paused_until)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(sub) = inserted {
            return Ok(sub);
        }

        // Row already existed for this pair
        self.get_subscription(subscription.recipient_id, subscription.project_id)
            .await?
            .ok_or_else(|| {
                subscription_not_found(subscription.recipient_id, subscription.project_id)
            })
    }

    async fn delete_subscription(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM subscriptions WHERE recipient_id = $1 AND project_id = $2")
                .bind(recipient_id)
                .bind(project_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_subscription(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let sub = sqlx::query_as(
            "SELECT * FROM subscriptions WHERE recipient_id = $1 AND project_id = $2",
        )
        .bind(recipient_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn list_subscriptions_by_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Subscription>, AppError> {
        let subs = sqlx::query_as(
            "SELECT * FROM subscriptions WHERE project_id = $1 ORDER BY created_at, id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    async fn list_subscriptions_by_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<Subscription>, AppError> {
        let subs = sqlx::query_as(
            "SELECT * FROM subscriptions WHERE recipient_id = $1 ORDER BY created_at, id",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    async fn set_muted(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
        muted: bool,
    ) -> Result<Subscription, AppError> {
        let sub: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET muted = $1, updated_at = NOW()
            WHERE recipient_id = $2 AND project_id = $3
            RETURNING *
            "#,
        )
        .bind(muted)
        .bind(recipient_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        sub.ok_or_else(|| subscription_not_found(recipient_id, project_id))
    }

    async fn set_paused_until(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
        paused_until: Option<DateTime<Utc>>,
    ) -> Result<Subscription, AppError> {
        let sub: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET paused_until = $1, updated_at = NOW()
            WHERE recipient_id = $2 AND project_id = $3
            RETURNING *
            "#,
        )
        .bind(paused_until)
        .bind(recipient_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        sub.ok_or_else(|| subscription_not_found(recipient_id, project_id))
    }
}
