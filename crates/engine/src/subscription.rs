//! Subscription service: recipient-facing management of subscriptions.
//!
//! Pausing is stored as a `paused_until` timestamp. Nothing here filters
//! paused subscriptions out; that happens in the gate at fan-out time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use noteo_common::error::AppError;
use noteo_common::types::{RecipientId, Subscription};

use crate::store::{ProjectStore, SubscriptionStore};

/// Pause length, in hours, used when the caller does not pick one.
pub const DEFAULT_PAUSE_HOURS: i64 = 24;

#[derive(Clone)]
pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionStore>,
    projects: Arc<dyn ProjectStore>,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        projects: Arc<dyn ProjectStore>,
    ) -> Self {
        Self {
            subscriptions,
            projects,
        }
    }

    /// Subscribe `recipient` to `project_id`. Subscribing twice returns the
    /// existing subscription unchanged.
    pub async fn subscribe(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
    ) -> Result<Subscription, AppError> {
        if self.projects.get_project(project_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Project {} not found",
                project_id
            )));
        }

        let now = Utc::now();
        let sub = self
            .subscriptions
            .insert_subscription(&Subscription {
                id: Uuid::new_v4(),
                recipient_id: recipient,
                project_id,
                muted: false,
                paused_until: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(
            subscription_id = %sub.id,
            recipient_id = %recipient,
            project_id = %project_id,
            "Subscribed"
        );

        Ok(sub)
    }

    pub async fn unsubscribe(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
    ) -> Result<(), AppError> {
        if !self
            .subscriptions
            .delete_subscription(recipient, project_id)
            .await?
        {
            return Err(not_subscribed(recipient, project_id));
        }

        tracing::info!(recipient_id = %recipient, project_id = %project_id, "Unsubscribed");
        Ok(())
    }

    pub async fn get(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
    ) -> Result<Subscription, AppError> {
        self.subscriptions
            .get_subscription(recipient, project_id)
            .await?
            .ok_or_else(|| not_subscribed(recipient, project_id))
    }

    pub async fn mute(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
    ) -> Result<Subscription, AppError> {
        self.subscriptions
            .set_muted(recipient, project_id, true)
            .await
    }

    pub async fn unmute(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
    ) -> Result<Subscription, AppError> {
        self.subscriptions
            .set_muted(recipient, project_id, false)
            .await
    }

    /// Pause delivery for `duration` from now.
    pub async fn pause_for(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
        duration: Duration,
    ) -> Result<Subscription, AppError> {
        if duration <= Duration::zero() {
            return Err(AppError::Validation(
                "Pause duration must be positive".to_string(),
            ));
        }
        self.pause_until(recipient, project_id, Utc::now() + duration)
            .await
    }

    pub async fn pause_until(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let sub = self
            .subscriptions
            .set_paused_until(recipient, project_id, Some(until))
            .await?;

        tracing::info!(
            recipient_id = %recipient,
            project_id = %project_id,
            paused_until = %until,
            "Subscription paused"
        );

        Ok(sub)
    }

    pub async fn resume(
        &self,
        recipient: RecipientId,
        project_id: Uuid,
    ) -> Result<Subscription, AppError> {
        self.subscriptions
            .set_paused_until(recipient, project_id, None)
            .await
    }

    /// Every subscription of a project, paused ones included.
    pub async fn project_subscriptions(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Subscription>, AppError> {
        self.subscriptions
            .list_subscriptions_by_project(project_id)
            .await
    }

    pub async fn recipient_subscriptions(
        &self,
        recipient: RecipientId,
    ) -> Result<Vec<Subscription>, AppError> {
        self.subscriptions
            .list_subscriptions_by_recipient(recipient)
            .await
    }
}

fn not_subscribed(recipient: RecipientId, project_id: Uuid) -> AppError {
    AppError::NotFound(format!(
        "Recipient {} is not subscribed to project {}",
        recipient, project_id
    ))
}
