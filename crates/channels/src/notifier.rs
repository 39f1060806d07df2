//! Notification manager — delivers terminal outcomes to channels.
//!
//! Every outcome goes to the originating channel plus each broadcast
//! channel. Delivery is deduplicated per `(request_id, channel)` through a
//! durable [`DeliveryLog`] claim, so racing drain cycles or a restart
//! between send and bookkeeping never produce a second message. Channels
//! are sent to concurrently; one failing channel does not affect the others.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use orion_core::channel::NotificationChannel;
use orion_core::store::DeliveryLog;
use tracing::{debug, error, info, warn};

/// What happened to a request, as far as the user is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Succeeded { result: String },
    Failed { attempts: u32, reason: String },
}

impl NotificationOutcome {
    /// The text sent to the user.
    pub fn text(&self) -> String {
        match self {
            Self::Succeeded { result } => {
                format!("✅ Your earlier request has been processed:\n\n{result}")
            }
            Self::Failed { attempts, reason } => {
                format!("❌ Failed to process your request after {attempts} attempts: {reason}")
            }
        }
    }
}

/// Per-channel result of one `notify` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub delivered: Vec<String>,
    /// Channels that had already received this outcome
    pub duplicates: Vec<String>,
    /// Channel name and error, for sends that failed
    pub failed: Vec<(String, String)>,
    /// Targets with no registered channel or no destination
    pub unavailable: Vec<String>,
}

impl NotificationReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Delivery {
    Delivered,
    Duplicate,
    Failed(String),
}

pub struct NotificationManager {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    broadcast: Vec<String>,
    deliveries: Arc<dyn DeliveryLog>,
}

impl NotificationManager {
    pub fn new(deliveries: Arc<dyn DeliveryLog>) -> Self {
        Self {
            channels: HashMap::new(),
            broadcast: Vec::new(),
            deliveries,
        }
    }

    /// Register a channel. Replaces any channel with the same name.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        let name = channel.name().to_string();
        debug!(channel = %name, "Registered notification channel");
        self.channels.insert(name, channel);
        self
    }

    /// Channels that receive every outcome, in addition to the origin.
    pub fn with_broadcast(mut self, channels: Vec<String>) -> Self {
        self.broadcast = channels;
        self
    }

    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Deliver `outcome` for `request_id` to the origin channel and every
    /// broadcast channel, at most once per channel.
    pub async fn notify(
        &self,
        request_id: &str,
        channel: &str,
        destination: &str,
        outcome: &NotificationOutcome,
    ) -> NotificationReport {
        let mut report = NotificationReport::default();
        let mut targets: Vec<(&Arc<dyn NotificationChannel>, String)> = Vec::new();

        match self.channels.get(channel) {
            Some(handle) => targets.push((handle, destination.to_string())),
            None => {
                debug!(request_id, channel, "Origin channel has no notifier");
                report.unavailable.push(channel.to_string());
            }
        }

        for name in &self.broadcast {
            if name == channel {
                continue;
            }
            match self.channels.get(name) {
                Some(handle) => match handle.default_destination() {
                    Some(dest) => targets.push((handle, dest.to_string())),
                    None => {
                        warn!(request_id, channel = %name, "Broadcast channel has no destination");
                        report.unavailable.push(name.clone());
                    }
                },
                None => {
                    warn!(request_id, channel = %name, "Broadcast channel is not registered");
                    report.unavailable.push(name.clone());
                }
            }
        }

        let text = outcome.text();
        let sends = targets
            .into_iter()
            .map(|(handle, dest)| {
                let text = &text;
                async move {
                    let name = handle.name().to_string();
                    let result = self.deliver(request_id, handle.as_ref(), &dest, text).await;
                    (name, result)
                }
            });

        for (name, result) in join_all(sends).await {
            match result {
                Delivery::Delivered => report.delivered.push(name),
                Delivery::Duplicate => report.duplicates.push(name),
                Delivery::Failed(reason) => report.failed.push((name, reason)),
            }
        }

        info!(
            request_id,
            delivered = report.delivered.len(),
            duplicates = report.duplicates.len(),
            failed = report.failed.len(),
            "Notification fan-out finished"
        );
        report
    }

    async fn deliver(
        &self,
        request_id: &str,
        channel: &dyn NotificationChannel,
        destination: &str,
        text: &str,
    ) -> Delivery {
        let name = channel.name();
        match self.deliveries.claim(request_id, name).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(request_id, channel = name, "Already notified, skipping");
                return Delivery::Duplicate;
            }
            Err(e) => {
                error!(request_id, channel = name, error = %e, "Cannot record delivery claim");
                return Delivery::Failed(e.to_string());
            }
        }

        match channel.send(destination, text).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                warn!(request_id, channel = name, error = %e, "Notification failed");
                if let Err(release) = self.deliveries.release(request_id, name).await {
                    error!(request_id, channel = name, error = %release, "Cannot release delivery claim");
                }
                Delivery::Failed(e.to_string())
            }
        }
    }
}
