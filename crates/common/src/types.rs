use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a notification recipient (a Telegram chat/user id).
///
/// Telegram user ids are positive integers; `new` rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RecipientId(i64);

impl RecipientId {
    pub fn new(id: i64) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecipientId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: i64 = s
            .parse()
            .map_err(|_| format!("'{}' is not a valid recipient id", s))?;
        Self::new(id).ok_or_else(|| format!("recipient id must be positive, got {}", id))
    }
}

/// A single outbound delivery: one event body addressed to one recipient.
///
/// Built fresh by the subscription gate for every fan-out and never mutated
/// after it has been submitted to the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub recipient: RecipientId,
    pub text: String,
    /// Deliver without triggering recipient-side alerting.
    pub silent: bool,
}

/// A publisher-owned event source. `token` is the bearer credential producers
/// use on the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub publisher_id: RecipientId,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recipient's subscription to a project. At most one per (recipient, project).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub recipient_id: RecipientId,
    pub project_id: Uuid,
    /// Muted subscriptions still receive events, delivered silently.
    pub muted: bool,
    pub paused_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription is paused as of `now`.
    pub fn is_paused_at(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| until > now)
    }

    /// Whether the subscription is paused right now. Evaluated on every call.
    pub fn is_paused(&self) -> bool {
        self.is_paused_at(Utc::now())
    }
}
