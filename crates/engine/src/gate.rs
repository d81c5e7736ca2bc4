//! Subscription gate: turns one event into per-recipient messages.
//!
//! Paused state is evaluated against the clock at fan-out time, never cached,
//! so a pause that elapses takes effect on the very next event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use noteo_common::error::AppError;
use noteo_common::types::{Message, Subscription};
use noteo_notifier::{MessageSink, SubmitError};

/// Outcome of a fan-out that was not cut short.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Messages accepted by the sink.
    pub queued: usize,
    /// Subscriptions skipped because they were paused.
    pub skipped_paused: usize,
    /// Messages the sink refused for a reason other than capacity.
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FanOutError {
    /// The sink filled up. Messages already queued for this event stay queued.
    #[error("delivery queue is full ({queued} of {total} messages queued)")]
    CapacityExceeded { queued: usize, total: usize },
}

impl From<FanOutError> for AppError {
    fn from(err: FanOutError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

/// Build the messages for `body` from a project's full subscription list.
///
/// One message per subscription not paused at `now`. Muted subscriptions
/// get a silent message.
pub fn messages_at(subscriptions: &[Subscription], body: &str, now: DateTime<Utc>) -> Vec<Message> {
    subscriptions
        .iter()
        .filter(|sub| !sub.is_paused_at(now))
        .map(|sub| Message {
            recipient: sub.recipient_id,
            text: body.to_string(),
            silent: sub.muted,
        })
        .collect()
}

#[derive(Clone)]
pub struct SubscriptionGate {
    sink: Arc<dyn MessageSink>,
}

impl SubscriptionGate {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Fan `body` out to every active subscription, evaluated now.
    pub fn fan_out(
        &self,
        subscriptions: &[Subscription],
        body: &str,
    ) -> Result<FanOutReport, FanOutError> {
        self.fan_out_at(subscriptions, body, Utc::now())
    }

    /// Fan out as of `now`. Stops at the first capacity rejection; any other
    /// rejection is logged and the remaining recipients are still tried.
    pub fn fan_out_at(
        &self,
        subscriptions: &[Subscription],
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<FanOutReport, FanOutError> {
        let messages = messages_at(subscriptions, body, now);
        let total = messages.len();
        let mut report = FanOutReport {
            skipped_paused: subscriptions.len() - total,
            ..FanOutReport::default()
        };

        for message in messages {
            let recipient = message.recipient;
            match self.sink.submit(message) {
                Ok(()) => report.queued += 1,
                Err(SubmitError::CapacityExceeded) => {
                    tracing::debug!(
                        queued = report.queued,
                        total,
                        "Delivery queue full, aborting fan-out"
                    );
                    return Err(FanOutError::CapacityExceeded {
                        queued: report.queued,
                        total,
                    });
                }
                Err(e) => {
                    tracing::warn!(recipient_id = %recipient, error = %e, "Message rejected");
                    report.rejected += 1;
                }
            }
        }

        tracing::debug!(
            queued = report.queued,
            skipped_paused = report.skipped_paused,
            rejected = report.rejected,
            "Fan-out complete"
        );

        Ok(report)
    }
}
