//! Messaging transport.
//!
//! [`Messenger`] is the seam between the dispatcher and the outside world. The
//! Telegram implementation posts to the Bot API; [`LogMessenger`] stands in when
//! no bot token is configured.

use crate::errors::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// A single button attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLink {
    /// Button label
    pub label: String,
    /// Target URL
    pub url: String,
}

/// Delivers plain-text messages to chat destinations
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    /// Sends `text` to the chat, optionally with one link button.
    async fn send_message(&self, chat_id: i64, text: &str, link: Option<&MessageLink>)
    -> Result<()>;
}

/// Messenger that only logs, used when Telegram is not configured
pub struct LogMessenger;

#[async_trait::async_trait]
impl Messenger for LogMessenger {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        link: Option<&MessageLink>,
    ) -> Result<()> {
        info!(
            chat_id,
            link = link.map(|l| l.url.as_str()),
            "Notification (not sent): {text}"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

/// Telegram Bot API client
pub struct TelegramMessenger {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramMessenger {
    /// Creates a client for the bot `token` against `api_url`.
    #[must_use]
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/bot{token}/sendMessage", api_url.trim_end_matches('/')),
        }
    }
}

fn message_body(chat_id: i64, text: &str, link: Option<&MessageLink>) -> serde_json::Value {
    match link {
        Some(link) => json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": {
                "inline_keyboard": [[{ "text": link.label, "url": link.url }]]
            }
        }),
        None => json!({ "chat_id": chat_id, "text": text }),
    }
}

#[async_trait::async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        link: Option<&MessageLink>,
    ) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&message_body(chat_id, text, link))
            .send()
            .await
            .map_err(|e| Error::Messaging {
                message: format!("Telegram request failed: {e}"),
            })?;

        let status = response.status();
        let body: TelegramResponse = response.json().await.map_err(|e| Error::Messaging {
            message: format!("Telegram response unreadable ({status}): {e}"),
        })?;

        if !status.is_success() || !body.ok {
            return Err(Error::Messaging {
                message: format!(
                    "Telegram rejected message to {chat_id} ({status}): {}",
                    body.description.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }
}
