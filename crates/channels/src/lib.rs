//! Notification delivery for Orion.
//!
//! The [`NotificationManager`] fans a request's terminal outcome out to
//! channels, at most once per channel. Available channels:
//! - **Console** — prints to the terminal (always available)
//! - **Telegram** — Bot API `sendMessage`
//! - **Webhook** — JSON POST to a configured URL

pub mod console;
pub mod notifier;
pub mod telegram;
pub mod webhook;

use std::sync::Arc;

use orion_config::NotificationsConfig;
use orion_core::store::DeliveryLog;

pub use console::ConsoleChannel;
pub use notifier::{NotificationManager, NotificationOutcome, NotificationReport};
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;

/// Build a manager with the console plus every channel the config enables.
pub fn manager_from_config(
    config: &NotificationsConfig,
    deliveries: Arc<dyn DeliveryLog>,
) -> NotificationManager {
    let mut manager = NotificationManager::new(deliveries)
        .with_channel(Arc::new(ConsoleChannel::new()))
        .with_broadcast(config.broadcast.clone());
    if let Some(telegram) = &config.telegram {
        manager = manager.with_channel(Arc::new(TelegramChannel::from_config(telegram)));
    }
    if let Some(webhook) = &config.webhook {
        manager = manager.with_channel(Arc::new(WebhookChannel::from_config(webhook)));
    }
    manager
}
