//! Console notification channel — prints to the terminal.
//!
//! Always available. Used by `orion agent` and `orion daemon` so queued
//! requests from the terminal still get their late answer somewhere visible.

use async_trait::async_trait;
use orion_core::channel::NotificationChannel;
use orion_core::error::ChannelError;
use tokio::io::{self, AsyncWriteExt};
use tracing::info;

#[derive(Debug, Default)]
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn default_destination(&self) -> Option<&str> {
        Some("stdout")
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError> {
        let line = format!("\n🔔 [{destination}] {text}\n");
        write_stdout(&line)
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "console".into(),
                reason: e.to_string(),
            })?;
        info!(destination, "Console notification printed");
        Ok(())
    }
}

async fn write_stdout(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_always_delivers() {
        let channel = ConsoleChannel::new();
        assert_eq!(channel.name(), "console");
        channel.send("me", "hello").await.unwrap();
    }
}
