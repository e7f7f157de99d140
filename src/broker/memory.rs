//! In-process broker for single-instance deployments and tests

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{pattern_matches, Broker, RawEvent, Subscription};
use crate::constants::MEMORY_BROKER_CAPACITY;
use crate::error::Result;

/// Broker that fans out over a tokio broadcast channel
pub struct MemoryBroker {
    sender: broadcast::Sender<RawEvent>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(MEMORY_BROKER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish_raw(&self, channel: &str, payload: String) -> Result<()> {
        let event = RawEvent {
            channel: channel.to_string(),
            payload,
        };
        // No subscribers is not an error, same as PUBLISH reaching zero clients
        if self.sender.send(event).is_err() {
            log::trace!("Published on {} with no subscribers", channel);
        }
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str], patterns: &[&str]) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            receiver: self.sender.subscribe(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }))
    }
}

struct MemorySubscription {
    receiver: broadcast::Receiver<RawEvent>,
    channels: Vec<String>,
    patterns: Vec<String>,
}

impl MemorySubscription {
    fn wants(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
            || self.patterns.iter().any(|p| pattern_matches(p, channel))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_event(&mut self) -> Option<RawEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event.channel) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Memory subscription lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn close(self: Box<Self>) {
        log::debug!("Memory subscription closed");
    }
}
