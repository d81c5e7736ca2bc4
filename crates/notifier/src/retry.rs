//! Exponential backoff retry for a single message.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use noteo_common::types::Message;

use crate::sender::{DeliverySender, SendError};

/// Why a message's delivery ended without success.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Every attempt failed. Carries the last sender error.
    #[error("delivery failed after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: SendError },

    /// Shutdown interrupted a backoff wait. Not a delivery failure.
    #[error("queue stopped during retry after {attempts} attempts")]
    Stopped { attempts: u32 },
}

/// Doubling backoff: the n-th retry waits `min(initial * 2^(n-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Wait before the `retry`-th retry (1-based). `delay_for(0)` is zero.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Attempt budget plus backoff curve applied to every message.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Total sends per message, the first one included.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Deliver `message`, retrying failures until success or the attempt budget
    /// runs out. Returns the number of attempts used on success.
    ///
    /// The backoff wait races `shutdown`: once it is cancelled the next wait
    /// returns [`DeliveryError::Stopped`] immediately. No wait follows the
    /// final attempt.
    pub async fn deliver(
        &self,
        sender: &dyn DeliverySender,
        message: &Message,
        shutdown: &CancellationToken,
    ) -> Result<u32, DeliveryError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match sender.send(message).await {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(DeliveryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.backoff.delay_for(attempt);
            tracing::warn!(
                recipient_id = %message.recipient,
                attempt,
                max_attempts,
                next_delay_ms = delay.as_millis() as u64,
                error = %error,
                "Failed to send message, will retry"
            );

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Err(DeliveryError::Stopped { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use noteo_common::types::RecipientId;

    /// Fails the first N calls, then succeeds.
    struct FlakySender {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakySender {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliverySender for FlakySender {
        async fn send(&self, _message: &Message) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                Err(SendError::Other("flaky".into()))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> Message {
        Message {
            recipient: RecipientId::new(7).unwrap(),
            text: "hello".to_string(),
            silent: false,
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(10)),
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(6), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_saturates_for_large_retries() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(32), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(33), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_uses_exact_attempt_budget() {
        let sender = FlakySender::new(u32::MAX);
        let shutdown = CancellationToken::new();

        let result = policy(4).deliver(&sender, &message(), &shutdown).await;

        match result {
            Err(DeliveryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(sender.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_follow_backoff() {
        let sender = FlakySender::new(2);
        let shutdown = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let attempts = policy(5)
            .deliver(&sender, &message(), &shutdown)
            .await
            .unwrap();

        assert_eq!(attempts, 3);
        // 1s after the first failure + 2s after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3050), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_shutdown_aborts_wait() {
        let sender = FlakySender::new(u32::MAX);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let started = tokio::time::Instant::now();

        let result = policy(5).deliver(&sender, &message(), &shutdown).await;

        assert!(matches!(result, Err(DeliveryError::Stopped { attempts: 1 })));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let sender = FlakySender::new(0);
        let shutdown = CancellationToken::new();
        let attempts = policy(3)
            .deliver(&sender, &message(), &shutdown)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }
}
