//! Shared application state for the Axum API server.

use std::sync::Arc;

use noteo_common::config::AppConfig;
use noteo_engine::gate::SubscriptionGate;
use noteo_engine::project::ProjectService;
use noteo_engine::store::{ProjectStore, SubscriptionStore};
use noteo_engine::subscription::SubscriptionService;
use noteo_notifier::DeliveryQueue;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub projects: ProjectService,
    pub subscriptions: SubscriptionService,
    pub gate: SubscriptionGate,
    pub queue: DeliveryQueue,
    pub config: AppConfig,
}

impl AppState {
    /// Wire services over a store that holds both projects and subscriptions.
    pub fn new<S>(store: Arc<S>, queue: DeliveryQueue, config: AppConfig) -> Self
    where
        S: ProjectStore + SubscriptionStore + 'static,
    {
        Self {
            projects: ProjectService::new(store.clone()),
            subscriptions: SubscriptionService::new(store.clone(), store),
            gate: SubscriptionGate::new(Arc::new(queue.clone())),
            queue,
            config,
        }
    }
}
