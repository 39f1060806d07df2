//! Channel trait — the abstraction over outbound notification targets.
//!
//! A notification channel delivers a piece of text to a destination
//! (a Telegram chat, a webhook URL, the terminal). How it does so is its
//! own business; the notification manager only sees ack or error.

use async_trait::async_trait;
use crate::error::ChannelError;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name as used in configuration (e.g., "telegram", "webhook").
    fn name(&self) -> &str;

    /// Where broadcast notifications go when the request came from elsewhere.
    fn default_destination(&self) -> Option<&str> {
        None
    }

    /// Deliver `text` to `destination`.
    async fn send(&self, destination: &str, text: &str) -> std::result::Result<(), ChannelError>;
}
