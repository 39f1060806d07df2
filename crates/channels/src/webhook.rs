//! Webhook notification channel.
//!
//! POSTs each notification as JSON to a configured URL:
//! `{"destination": "...", "text": "...", "sent_at": "<RFC 3339>"}`.

use async_trait::async_trait;
use chrono::Utc;
use orion_config::WebhookConfig;
use orion_core::channel::NotificationChannel;
use orion_core::error::ChannelError;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    destination: &'a str,
    text: &'a str,
    sent_at: String,
}

#[derive(Debug)]
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    /// The URL itself is the destination for broadcasts.
    fn default_destination(&self) -> Option<&str> {
        Some(&self.url)
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError> {
        let payload = WebhookPayload {
            destination,
            text,
            sent_at: Utc::now().to_rfc3339(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "webhook".into(),
                reason: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::DeliveryFailed {
                channel: "webhook".into(),
                reason: format!("HTTP {status}"),
            });
        }

        info!(url = %self.url, destination, "Webhook notification sent");
        Ok(())
    }
}
