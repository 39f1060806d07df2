//! Telegram notification channel.
//!
//! Delivers text through the Bot API `sendMessage` method. Texts longer
//! than Telegram's message limit are split into several messages.

use async_trait::async_trait;
use orion_config::TelegramConfig;
use orion_core::channel::NotificationChannel;
use orion_core::error::ChannelError;
use serde_json::json;
use tracing::{debug, info};

/// Telegram rejects messages above 4096 characters; stay below with margin.
const MAX_CHUNK_CHARS: usize = 4000;

pub struct TelegramChannel {
    bot_token: String,
    chat_id: Option<String>,
    api_url: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: None,
            api_url: "https://api.telegram.org".into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        let mut channel = Self::new(config.bot_token.clone()).with_api_url(config.api_url.clone());
        channel.chat_id = config.chat_id.clone();
        channel
    }

    /// Chat that receives broadcast notifications.
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Point at a different Bot API server (self-hosted or a test double).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }

    fn failed(&self, reason: impl Into<String>) -> ChannelError {
        ChannelError::DeliveryFailed {
            channel: "telegram".into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("bot_token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Split text into chunks of at most `max` characters, on char boundaries.
pub fn split_message(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn default_destination(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError> {
        if self.bot_token.is_empty() {
            return Err(ChannelError::NotConfigured("telegram bot token is empty".into()));
        }

        let chunks = split_message(text, MAX_CHUNK_CHARS);
        for chunk in &chunks {
            let response = self
                .client
                .post(self.endpoint())
                .json(&json!({ "chat_id": destination, "text": chunk }))
                .send()
                .await
                .map_err(|e| self.failed(format!("HTTP request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(self.failed(format!("HTTP {status}: {body}")));
            }
            debug!(chat_id = %destination, chars = chunk.chars().count(), "Telegram chunk sent");
        }

        info!(chat_id = %destination, parts = chunks.len(), "Telegram notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 4000), vec!["hello"]);
        assert!(split_message("", 4000).is_empty());
    }

    #[test]
    fn long_text_splits_on_char_boundaries() {
        let text = "é".repeat(9);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 4);
        assert_eq!(chunks[2].chars().count(), 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn from_config_carries_chat_id() {
        let channel = TelegramChannel::from_config(&TelegramConfig {
            bot_token: "123:abc".into(),
            chat_id: Some("42".into()),
            api_url: "https://api.telegram.org/".into(),
        });
        assert_eq!(channel.default_destination(), Some("42"));
        assert_eq!(channel.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
    }

    #[test]
    fn debug_redacts_token() {
        let channel = TelegramChannel::new("secret-token");
        assert!(!format!("{channel:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn empty_token_is_not_configured() {
        let channel = TelegramChannel::new("");
        assert!(matches!(
            channel.send("42", "hi").await,
            Err(ChannelError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_delivery_failure() {
        let channel = TelegramChannel::new("tok").with_api_url("http://127.0.0.1:1");
        assert!(matches!(
            channel.send("42", "hi").await,
            Err(ChannelError::DeliveryFailed { .. })
        ));
    }
}
