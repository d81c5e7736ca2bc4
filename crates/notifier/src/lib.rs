//! Notification delivery engine.
//!
//! A bounded, single-consumer [`DeliveryQueue`] that hands each [`Message`]
//! to a [`DeliverySender`], retrying transient failures with exponential
//! backoff. Producers never block: a full buffer is reported immediately.
//!
//! [`Message`]: noteo_common::types::Message

pub mod config;
pub mod dead_letter;
pub mod queue;
pub mod retry;
pub mod sender;

pub use config::{ExhaustionPolicy, QueueConfig};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use queue::{DeliveryQueue, MessageSink, QueueError, QueueState, SubmitError};
pub use retry::{Backoff, DeliveryError, RetryPolicy};
pub use sender::{DeliverySender, SendError, TelegramSender};
