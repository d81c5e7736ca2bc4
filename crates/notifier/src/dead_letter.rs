use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use noteo_common::types::Message;

/// A message that used up all its delivery attempts.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub message: Message,
    /// Last sender error, rendered.
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// In-memory dead-letter queue, used when the queue runs with
/// [`ExhaustionPolicy::DeadLetter`](crate::ExhaustionPolicy::DeadLetter).
///
/// Holds at most `capacity` entries; once full, the oldest entry is dropped
/// to make room. The lock is a std `Mutex` and is never held across an
/// `.await`.
#[derive(Debug)]
pub struct DeadLetterQueue {
    capacity: usize,
    entries: Mutex<VecDeque<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, message: Message, error: String, attempts: u32) {
        if self.capacity == 0 {
            tracing::warn!(recipient_id = %message.recipient, "Dead-letter queue disabled, dropping message");
            return;
        }

        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            if let Some(dropped) = entries.pop_front() {
                tracing::warn!(
                    recipient_id = %dropped.message.recipient,
                    failed_at = %dropped.failed_at,
                    capacity = self.capacity,
                    "Dead-letter queue full, dropping oldest entry"
                );
            }
        }
        entries.push_back(DeadLetterEntry {
            message,
            error,
            attempts,
            failed_at: Utc::now(),
        });
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetterEntry> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetterEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
