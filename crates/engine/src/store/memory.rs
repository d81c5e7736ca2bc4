use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use noteo_common::error::AppError;
use noteo_common::types::{Project, RecipientId, Subscription};

use super::{ProjectStore, SubscriptionStore, project_not_found, subscription_not_found};

/// Process-local store. Everything is lost when the process exits.
///
/// Each mutation takes the write lock once, so single-field updates never
/// clobber a concurrent update of another field.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<Uuid, Project>>,
    subscriptions: RwLock<HashMap<(RecipientId, Uuid), Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn projects(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Project>> {
        self.projects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn projects_mut(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Project>> {
        self.projects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions(&self) -> RwLockReadGuard<'_, HashMap<(RecipientId, Uuid), Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions_mut(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<(RecipientId, Uuid), Subscription>> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update_subscription<F>(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
        apply: F,
    ) -> Result<Subscription, AppError>
    where
        F: FnOnce(&mut Subscription),
    {
        let mut subscriptions = self.subscriptions_mut();
        let sub = subscriptions
            .get_mut(&(recipient_id, project_id))
            .ok_or_else(|| subscription_not_found(recipient_id, project_id))?;
        apply(sub);
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }
}

fn sorted<T, K: Ord>(mut items: Vec<T>, key: impl FnMut(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn insert_project(&self, project: &Project) -> Result<(), AppError> {
        let mut projects = self.projects_mut();
        if projects.contains_key(&project.id) {
            return Err(AppError::Conflict(format!(
                "Project {} already exists",
                project.id
            )));
        }
        if projects
            .values()
            .any(|p| p.publisher_id == project.publisher_id && p.name == project.name)
        {
            return Err(AppError::Conflict(format!(
                "Project '{}' already exists",
                project.name
            )));
        }
        if projects.values().any(|p| p.token == project.token) {
            return Err(AppError::Conflict("Project token already in use".to_string()));
        }
        projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        Ok(self.projects().get(&id).cloned())
    }

    async fn get_project_by_token(&self, token: &str) -> Result<Option<Project>, AppError> {
        Ok(self.projects().values().find(|p| p.token == token).cloned())
    }

    async fn list_projects_by_publisher(
        &self,
        publisher_id: RecipientId,
    ) -> Result<Vec<Project>, AppError> {
        let projects = self
            .projects()
            .values()
            .filter(|p| p.publisher_id == publisher_id)
            .cloned()
            .collect();
        Ok(sorted(projects, |p| (p.created_at, p.id)))
    }

    async fn update_project_name(&self, id: Uuid, name: &str) -> Result<Project, AppError> {
        let mut projects = self.projects_mut();
        let publisher_id = projects
            .get(&id)
            .map(|p| p.publisher_id)
            .ok_or_else(|| project_not_found(id))?;
        if projects
            .values()
            .any(|p| p.id != id && p.publisher_id == publisher_id && p.name == name)
        {
            return Err(AppError::Conflict(format!(
                "Project '{}' already exists",
                name
            )));
        }
        let project = projects.get_mut(&id).ok_or_else(|| project_not_found(id))?;
        project.name = name.to_string();
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn update_project_token(&self, id: Uuid, token: &str) -> Result<Project, AppError> {
        let mut projects = self.projects_mut();
        if projects.values().any(|p| p.id != id && p.token == token) {
            return Err(AppError::Conflict("Project token already in use".to_string()));
        }
        let project = projects.get_mut(&id).ok_or_else(|| project_not_found(id))?;
        project.token = token.to_string();
        project.updated_at = Utc::now();
        Ok(project.clone())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError> {
        let mut subscriptions = self.subscriptions_mut();
        let existing = subscriptions
            .entry((subscription.recipient_id, subscription.project_id))
            .or_insert_with(|| subscription.clone());
        Ok(existing.clone())
    }

    async fn delete_subscription(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
    ) -> Result<bool, AppError> {
        Ok(self
            .subscriptions_mut()
            .remove(&(recipient_id, project_id))
            .is_some())
    }

    async fn get_subscription(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self
            .subscriptions()
            .get(&(recipient_id, project_id))
            .cloned())
    }

    async fn list_subscriptions_by_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Subscription>, AppError> {
        let subs = self
            .subscriptions()
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        Ok(sorted(subs, |s| (s.created_at, s.id)))
    }

    async fn list_subscriptions_by_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<Subscription>, AppError> {
        let subs = self
            .subscriptions()
            .values()
            .filter(|s| s.recipient_id == recipient_id)
            .cloned()
            .collect();
        Ok(sorted(subs, |s| (s.created_at, s.id)))
    }

    async fn set_muted(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
        muted: bool,
    ) -> Result<Subscription, AppError> {
        self.update_subscription(recipient_id, project_id, |sub| sub.muted = muted)
    }

    async fn set_paused_until(
        &self,
        recipient_id: RecipientId,
        project_id: Uuid,
        paused_until: Option<DateTime<Utc>>,
    ) -> Result<Subscription, AppError> {
        self.update_subscription(recipient_id, project_id, |sub| {
            sub.paused_until = paused_until
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(id: i64) -> RecipientId {
        RecipientId::new(id).unwrap()
    }

    fn make_project(publisher: i64, name: &str, token: &str) -> Project {
        let now = Utc::now();
        Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            publisher_id: recipient(publisher),
            token: token.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn make_subscription(recipient_id: i64, project_id: Uuid) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            recipient_id: recipient(recipient_id),
            project_id,
            muted: false,
            paused_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_project_name_unique_per_publisher() {
        let store = MemoryStore::new();
        store
            .insert_project(&make_project(1, "ci", "t1"))
            .await
            .unwrap();

        let dup = store.insert_project(&make_project(1, "ci", "t2")).await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));

        // Same name, other publisher is fine
        store
            .insert_project(&make_project(2, "ci", "t3"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_project_lookup_by_token() {
        let store = MemoryStore::new();
        let project = make_project(1, "ci", "secret");
        store.insert_project(&project).await.unwrap();

        let found = store.get_project_by_token("secret").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(project.id));
        assert!(store.get_project_by_token("nope").await.unwrap().is_none());

        store.update_project_token(project.id, "rotated").await.unwrap();
        assert!(store.get_project_by_token("secret").await.unwrap().is_none());
        assert!(store.get_project_by_token("rotated").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_subscription_insert_is_idempotent_per_pair() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let first = store
            .insert_subscription(&make_subscription(7, project_id))
            .await
            .unwrap();
        let second = store
            .insert_subscription(&make_subscription(7, project_id))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(
            store
                .list_subscriptions_by_project(project_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_field_updates_are_independent() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        store
            .insert_subscription(&make_subscription(7, project_id))
            .await
            .unwrap();

        let until = Utc::now() + chrono::Duration::hours(1);
        store
            .set_paused_until(recipient(7), project_id, Some(until))
            .await
            .unwrap();
        let sub = store.set_muted(recipient(7), project_id, true).await.unwrap();

        assert!(sub.muted);
        assert_eq!(sub.paused_until, Some(until));
    }

    #[tokio::test]
    async fn test_update_missing_subscription_is_not_found() {
        let store = MemoryStore::new();
        let result = store.set_muted(recipient(7), Uuid::new_v4(), true).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        store
            .insert_subscription(&make_subscription(7, project_id))
            .await
            .unwrap();

        assert!(store.delete_subscription(recipient(7), project_id).await.unwrap());
        assert!(!store.delete_subscription(recipient(7), project_id).await.unwrap());
        assert!(
            store
                .get_subscription(recipient(7), project_id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
