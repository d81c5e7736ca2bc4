//! Bounded single-consumer delivery queue.
//!
//! Lifecycle: `Created` → [`start`](DeliveryQueue::start) → `Running` →
//! [`stop`](DeliveryQueue::stop) → `Draining` → `Stopped`. Messages are only
//! accepted while `Running`. On stop the consumer still attempts every buffered
//! message, but any backoff wait (including one already in progress) ends at
//! once, so a failing message gets no further attempts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use noteo_common::types::Message;

use crate::config::{ExhaustionPolicy, QueueConfig};
use crate::dead_letter::DeadLetterQueue;
use crate::retry::DeliveryError;
use crate::sender::DeliverySender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Synchronous rejection of a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("message queue is full")]
    CapacityExceeded,

    #[error("message queue is not accepting messages (state: {0:?})")]
    NotRunning(QueueState),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message queue cannot be started from state {0:?}")]
    InvalidState(QueueState),

    #[error("delivery consumer terminated abnormally: {0}")]
    Consumer(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Anything messages can be handed to without blocking.
pub trait MessageSink: Send + Sync {
    fn submit(&self, message: Message) -> Result<(), SubmitError>;
}

struct Buffer {
    state: QueueState,
    messages: VecDeque<Message>,
}

struct Inner {
    config: QueueConfig,
    sender: Arc<dyn DeliverySender>,
    buffer: Mutex<Buffer>,
    /// Wakes the consumer when a message is pushed.
    available: Notify,
    /// Broadcast by `stop`; interrupts waits in the consumer.
    shutdown: CancellationToken,
    /// Fired when the consumer dies from retry exhaustion.
    failed: CancellationToken,
    /// Fired when the consumer task has exited, for any reason.
    finished: CancellationToken,
    consumer: Mutex<Option<JoinHandle<Result<(), DeliveryError>>>>,
    dead_letters: DeadLetterQueue,
}

/// Cloneable handle to a delivery queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    pub fn new(config: QueueConfig, sender: Arc<dyn DeliverySender>) -> Self {
        let dead_letters = DeadLetterQueue::new(config.dead_letter_capacity);
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Buffer {
                    state: QueueState::Created,
                    messages: VecDeque::with_capacity(config.capacity.min(1024)),
                }),
                config,
                sender,
                available: Notify::new(),
                shutdown: CancellationToken::new(),
                failed: CancellationToken::new(),
                finished: CancellationToken::new(),
                consumer: Mutex::new(None),
                dead_letters,
            }),
        }
    }

    /// Spawn the consumer loop. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut consumer = lock(&self.inner.consumer);
        {
            let mut buffer = lock(&self.inner.buffer);
            if buffer.state != QueueState::Created {
                return Err(QueueError::InvalidState(buffer.state));
            }
            buffer.state = QueueState::Running;
        }

        tracing::info!(
            capacity = self.inner.config.capacity,
            max_attempts = self.inner.config.max_attempts,
            "Starting message queue"
        );

        let inner = Arc::clone(&self.inner);
        *consumer = Some(tokio::spawn(async move {
            let _finished = inner.finished.clone().drop_guard();
            inner.consume().await
        }));
        Ok(())
    }

    /// Buffer a message for delivery. Never blocks.
    pub fn submit(&self, message: Message) -> Result<(), SubmitError> {
        {
            let mut buffer = lock(&self.inner.buffer);
            if buffer.state != QueueState::Running {
                return Err(SubmitError::NotRunning(buffer.state));
            }
            if buffer.messages.len() >= self.inner.config.capacity {
                return Err(SubmitError::CapacityExceeded);
            }
            buffer.messages.push_back(message);
        }
        self.inner.available.notify_one();
        Ok(())
    }

    /// Stop accepting messages, drain the buffer and wait for the consumer to
    /// exit.
    ///
    /// Returns the fatal error if the consumer had terminated on retry
    /// exhaustion. Has no deadline of its own; wrap it in
    /// `tokio::time::timeout` for a bounded shutdown. Concurrent or repeated
    /// calls wait for the same exit and return `Ok`.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let handle = {
            let mut consumer = lock(&self.inner.consumer);
            let mut buffer = lock(&self.inner.buffer);
            match buffer.state {
                QueueState::Created => {
                    // No consumer will ever run
                    buffer.state = QueueState::Stopped;
                    self.inner.finished.cancel();
                    return Ok(());
                }
                QueueState::Running => buffer.state = QueueState::Draining,
                QueueState::Draining | QueueState::Stopped => {}
            }
            consumer.take()
        };

        self.inner.shutdown.cancel();

        let Some(handle) = handle else {
            self.inner.finished.cancelled().await;
            return Ok(());
        };

        let result = handle.await;
        lock(&self.inner.buffer).state = QueueState::Stopped;
        tracing::info!("Message queue stopped");

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(QueueError::Delivery(e)),
            Err(e) => Err(QueueError::Consumer(e.to_string())),
        }
    }

    pub fn state(&self) -> QueueState {
        lock(&self.inner.buffer).state
    }

    /// Number of buffered messages not yet picked up by the consumer.
    pub fn len(&self) -> usize {
        lock(&self.inner.buffer).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Token cancelled when delivery has failed fatally and the process
    /// should shut down.
    pub fn failed(&self) -> CancellationToken {
        self.inner.failed.clone()
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.inner.dead_letters
    }
}

impl MessageSink for DeliveryQueue {
    fn submit(&self, message: Message) -> Result<(), SubmitError> {
        DeliveryQueue::submit(self, message)
    }
}

impl Inner {
    async fn consume(&self) -> Result<(), DeliveryError> {
        let policy = self.config.retry_policy();

        while let Some(message) = self.next_message().await {
            let error = match policy
                .deliver(self.sender.as_ref(), &message, &self.shutdown)
                .await
            {
                Ok(attempts) => {
                    tracing::debug!(
                        recipient_id = %message.recipient,
                        attempts,
                        "Message delivered"
                    );
                    continue;
                }
                Err(e @ DeliveryError::Stopped { .. }) => {
                    tracing::warn!(
                        recipient_id = %message.recipient,
                        error = %e,
                        "Delivery abandoned, queue stopped during retry"
                    );
                    continue;
                }
                Err(e) => e,
            };

            match self.config.on_exhausted {
                ExhaustionPolicy::DeadLetter => {
                    let attempts = match &error {
                        DeliveryError::Exhausted { attempts, .. }
                        | DeliveryError::Stopped { attempts } => *attempts,
                    };
                    tracing::error!(
                        recipient_id = %message.recipient,
                        error = %error,
                        "Failed to send message after all retries, moved to dead-letter queue"
                    );
                    self.dead_letters.push(message, error.to_string(), attempts);
                }
                ExhaustionPolicy::Shutdown => {
                    let abandoned = self.close();
                    tracing::error!(
                        recipient_id = %message.recipient,
                        error = %error,
                        abandoned,
                        "Failed to send message after all retries, stopping delivery"
                    );
                    self.failed.cancel();
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Next buffered message, waiting while the queue is running and empty.
    /// `None` once the queue has left `Running` and the buffer is empty.
    async fn next_message(&self) -> Option<Message> {
        loop {
            {
                let mut buffer = lock(&self.buffer);
                if let Some(message) = buffer.messages.pop_front() {
                    return Some(message);
                }
                if buffer.state != QueueState::Running {
                    return None;
                }
            }

            tokio::select! {
                _ = self.available.notified() => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Refuse further submits and discard the buffer. Returns the number of
    /// discarded messages.
    fn close(&self) -> usize {
        let mut buffer = lock(&self.buffer);
        buffer.state = QueueState::Stopped;
        let abandoned = buffer.messages.len();
        buffer.messages.clear();
        abandoned
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use noteo_common::types::RecipientId;
    use tokio::sync::Semaphore;

    use crate::sender::SendError;

    // -- Mock senders ---------------------------------------------------------

    /// Records every message; each send first waits for a permit.
    struct GatedSender {
        permits: Semaphore,
        entered: Notify,
        delivered: Mutex<Vec<Message>>,
    }

    impl GatedSender {
        fn open() -> Arc<Self> {
            Self::with_permits(Semaphore::MAX_PERMITS)
        }

        fn closed() -> Arc<Self> {
            Self::with_permits(0)
        }

        fn with_permits(permits: usize) -> Arc<Self> {
            Arc::new(Self {
                permits: Semaphore::new(permits),
                entered: Notify::new(),
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn delivered(&self) -> Vec<Message> {
            lock(&self.delivered).clone()
        }
    }

    #[async_trait]
    impl DeliverySender for GatedSender {
        async fn send(&self, message: &Message) -> Result<(), SendError> {
            self.entered.notify_one();
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| SendError::Other(e.to_string()))?;
            permit.forget();
            lock(&self.delivered).push(message.clone());
            Ok(())
        }
    }

    /// Fails every message addressed to `failing_recipient`; succeeds otherwise.
    struct SelectiveSender {
        failing_recipient: RecipientId,
        failures_left: AtomicU32,
        calls: AtomicU32,
        first_call: Notify,
        delivered: Notify,
    }

    impl SelectiveSender {
        fn new(failing_recipient: i64, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failing_recipient: RecipientId::new(failing_recipient).unwrap(),
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                first_call: Notify::new(),
                delivered: Notify::new(),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeliverySender for SelectiveSender {
        async fn send(&self, message: &Message) -> Result<(), SendError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.first_call.notify_one();
            }
            if message.recipient == self.failing_recipient {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    return Err(SendError::Other("chat unavailable".into()));
                }
            }
            self.delivered.notify_one();
            Ok(())
        }
    }

    // -- Helpers --------------------------------------------------------------

    fn message(recipient: i64, text: &str) -> Message {
        Message {
            recipient: RecipientId::new(recipient).unwrap(),
            text: text.to_string(),
            silent: false,
        }
    }

    fn config(capacity: usize) -> QueueConfig {
        QueueConfig {
            capacity,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
            max_attempts: 3,
            on_exhausted: ExhaustionPolicy::Shutdown,
            dead_letter_capacity: 10,
        }
    }

    async fn wait_for_state(queue: &DeliveryQueue, state: QueueState) {
        while queue.state() != state {
            tokio::task::yield_now().await;
        }
    }

    // -- Tests ----------------------------------------------------------------

    #[tokio::test]
    async fn test_messages_delivered_in_submission_order() {
        let sender = GatedSender::open();
        let queue = DeliveryQueue::new(config(100), sender.clone());
        queue.start().unwrap();

        let expected: Vec<Message> = (0..50).map(|i| message(1, &format!("m{i}"))).collect();
        for msg in &expected {
            queue.submit(msg.clone()).unwrap();
        }
        queue.stop().await.unwrap();

        assert_eq!(sender.delivered(), expected);
        assert_eq!(queue.state(), QueueState::Stopped);
    }

    #[tokio::test]
    async fn test_submit_before_start_rejected() {
        let queue = DeliveryQueue::new(config(10), GatedSender::open());
        assert_eq!(
            queue.submit(message(1, "early")),
            Err(SubmitError::NotRunning(QueueState::Created))
        );
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let queue = DeliveryQueue::new(config(10), GatedSender::open());
        queue.start().unwrap();
        assert!(matches!(
            queue.start(),
            Err(QueueError::InvalidState(QueueState::Running))
        ));
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_capacity_rejects_every_submit() {
        let queue = DeliveryQueue::new(config(0), GatedSender::open());
        queue.start().unwrap();
        assert_eq!(
            queue.submit(message(1, "a")),
            Err(SubmitError::CapacityExceeded)
        );
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_submits_on_single_slot() {
        let sender = GatedSender::closed();
        let queue = DeliveryQueue::new(config(1), sender.clone());
        queue.start().unwrap();

        // Occupy the consumer so nothing is drained from the buffer
        queue.submit(message(1, "in-flight")).unwrap();
        sender.entered.notified().await;
        assert!(queue.is_empty());

        let (q1, q2) = (queue.clone(), queue.clone());
        let (a, b) = tokio::join!(
            tokio::spawn(async move { q1.submit(message(2, "a")) }),
            tokio::spawn(async move { q2.submit(message(3, "b")) }),
        );
        let results = [a.unwrap(), b.unwrap()];

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| **r == Err(SubmitError::CapacityExceeded))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(rejected, 1);

        sender.permits.add_permits(2);
        queue.stop().await.unwrap();
        assert_eq!(sender.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_drains_buffer_and_refuses_new_work() {
        let sender = GatedSender::closed();
        let queue = DeliveryQueue::new(config(10), sender.clone());
        queue.start().unwrap();

        for i in 0..3 {
            queue.submit(message(1, &format!("m{i}"))).unwrap();
        }
        sender.entered.notified().await;

        let stopping = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.stop().await })
        };
        wait_for_state(&queue, QueueState::Draining).await;
        assert_eq!(
            queue.submit(message(1, "late")),
            Err(SubmitError::NotRunning(QueueState::Draining))
        );

        sender.permits.add_permits(3);
        stopping.await.unwrap().unwrap();

        let texts: Vec<String> = sender.delivered().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2"]);
        assert_eq!(
            queue.submit(message(1, "after")),
            Err(SubmitError::NotRunning(QueueState::Stopped))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_waits_backoff() {
        let sender = SelectiveSender::new(1, 2);
        let mut cfg = config(10);
        cfg.max_attempts = 5;
        let queue = DeliveryQueue::new(cfg, sender.clone());
        queue.start().unwrap();

        let started = tokio::time::Instant::now();
        queue.submit(message(1, "hello")).unwrap();
        sender.delivered.notified().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3050), "{:?}", elapsed);
        assert_eq!(sender.calls(), 3);

        queue.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_stops_engine() {
        let sender = SelectiveSender::new(1, u32::MAX);
        let queue = DeliveryQueue::new(config(10), sender.clone());
        queue.start().unwrap();

        queue.submit(message(1, "doomed")).unwrap();
        queue.failed().cancelled().await;

        assert_eq!(sender.calls(), 3);
        assert_eq!(
            queue.submit(message(2, "next")),
            Err(SubmitError::NotRunning(QueueState::Stopped))
        );
        match queue.stop().await {
            Err(QueueError::Delivery(DeliveryError::Exhausted { attempts, .. })) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_policy_keeps_consuming() {
        let sender = SelectiveSender::new(1, u32::MAX);
        let mut cfg = config(10);
        cfg.on_exhausted = ExhaustionPolicy::DeadLetter;
        let queue = DeliveryQueue::new(cfg, sender.clone());
        queue.start().unwrap();

        queue.submit(message(1, "doomed")).unwrap();
        queue.submit(message(2, "fine")).unwrap();
        sender.delivered.notified().await;

        assert_eq!(sender.calls(), 4);
        assert!(!queue.failed().is_cancelled());
        queue.stop().await.unwrap();

        let entries = queue.dead_letters().drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.text, "doomed");
        assert_eq!(entries[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff_wait() {
        let sender = SelectiveSender::new(1, u32::MAX);
        let mut cfg = config(10);
        cfg.initial_retry_delay = Duration::from_secs(3600);
        cfg.max_retry_delay = Duration::from_secs(3600);
        cfg.max_attempts = 5;
        let queue = DeliveryQueue::new(cfg, sender.clone());
        queue.start().unwrap();

        queue.submit(message(1, "stuck")).unwrap();
        sender.first_call.notified().await;

        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(5), queue.stop())
            .await
            .expect("stop must not wait out the backoff")
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sender.calls(), 1);
        assert!(!queue.failed().is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let queue = DeliveryQueue::new(config(10), GatedSender::open());
        queue.stop().await.unwrap();
        assert_eq!(queue.state(), QueueState::Stopped);
        assert!(matches!(
            queue.start(),
            Err(QueueError::InvalidState(QueueState::Stopped))
        ));
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_stop_is_noop() {
        let queue = DeliveryQueue::new(config(10), GatedSender::open());
        queue.start().unwrap();
        queue.stop().await.unwrap();
        queue.stop().await.unwrap();
    }
}
