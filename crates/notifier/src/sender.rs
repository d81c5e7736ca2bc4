//! Delivery senders: the capability that performs one delivery attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use noteo_common::types::Message;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// A failed delivery attempt. The queue treats every variant as transient.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API rejected message ({status}): {description}")]
    Rejected { status: u16, description: String },

    #[error("{0}")]
    Other(String),
}

/// Performs a single delivery attempt for a message.
///
/// Implementations must not retry internally in a way that hides failures;
/// the delivery queue owns the retry policy.
#[async_trait]
pub trait DeliverySender: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), SendError>;
}

/// Body of the Bot API `sendMessage` call.
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    disable_notification: bool,
}

impl<'a> From<&'a Message> for SendMessageRequest<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            chat_id: message.recipient.as_i64(),
            text: &message.text,
            disable_notification: message.silent,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    description: Option<String>,
}

/// Delivers messages through the Telegram Bot API.
pub struct TelegramSender {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramSender {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: TELEGRAM_API_URL.to_string(),
            token: token.into(),
        }
    }

    /// Point the sender at a different Bot API server (e.g. a local one).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

#[async_trait]
impl DeliverySender for TelegramSender {
    async fn send(&self, message: &Message) -> Result<(), SendError> {
        // The URL embeds the bot token, keep it out of error messages
        let response = self
            .client
            .post(self.endpoint())
            .json(&SendMessageRequest::from(message))
            .send()
            .await
            .map_err(|e| SendError::Http(e.without_url()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let description = response
            .json::<ApiErrorResponse>()
            .await
            .ok()
            .and_then(|body| body.description)
            .unwrap_or_else(|| "no description".to_string());

        Err(SendError::Rejected {
            status: status.as_u16(),
            description,
        })
    }
}
