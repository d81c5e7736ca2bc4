use std::time::Duration;

use noteo_common::config::AppConfig;

use crate::retry::{Backoff, RetryPolicy};

pub use noteo_common::config::ExhaustionPolicy;

/// Configuration for the [`DeliveryQueue`](crate::DeliveryQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of buffered (not yet consumed) messages.
    pub capacity: usize,
    /// Wait before the first retry.
    pub initial_retry_delay: Duration,
    /// Upper bound on any single backoff wait.
    pub max_retry_delay: Duration,
    /// Delivery attempts per message, the first one included.
    pub max_attempts: u32,
    /// What happens once a message has used up all its attempts.
    pub on_exhausted: ExhaustionPolicy,
    /// Dead-letter entries kept under [`ExhaustionPolicy::DeadLetter`].
    pub dead_letter_capacity: usize,
}

impl QueueConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            capacity: config.queue_capacity,
            initial_retry_delay: config.queue_initial_retry_delay,
            max_retry_delay: config.queue_max_retry_delay,
            max_attempts: config.queue_max_attempts,
            on_exhausted: config.queue_on_exhausted,
            dead_letter_capacity: config.queue_dead_letter_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Backoff::new(self.initial_retry_delay, self.max_retry_delay),
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            max_attempts: 10,
            on_exhausted: ExhaustionPolicy::Shutdown,
            dead_letter_capacity: 1000,
        }
    }
}
