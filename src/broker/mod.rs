//! Publish/subscribe fanout shared by every relay instance
//!
//! Instances never share memory. Anything another instance must react to
//! (a message for a user it holds, a presence change, a read receipt) is
//! published here as a [`BrokerEvent`] and consumed by each instance's
//! subscriber loop.

pub mod events;
pub mod memory;
pub mod redis_broker;

use async_trait::async_trait;

use crate::error::Result;

pub use events::{
    BrokerEvent, DirectMessageEvent, GroupMessageEvent, GroupReadEvent, PresenceEvent,
    ReadReceiptEvent,
};
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;

/// A payload as received from the broker, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub channel: String,
    pub payload: String,
}

/// Publish side of the fanout
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish an already-encoded payload on a channel
    async fn publish_raw(&self, channel: &str, payload: String) -> Result<()>;

    /// Subscribe to exact channel names and glob patterns
    async fn subscribe(&self, channels: &[&str], patterns: &[&str]) -> Result<Box<dyn Subscription>>;

    /// JSON-encode an event and publish it on its channel
    async fn publish(&self, event: &BrokerEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.publish_raw(&event.channel(), payload).await
    }
}

/// A live subscription
#[async_trait]
pub trait Subscription: Send {
    /// Next payload, or `None` once the subscription is gone
    async fn next_event(&mut self) -> Option<RawEvent>;

    /// Unsubscribe and release broker resources
    async fn close(self: Box<Self>);
}

/// Minimal glob matching for subscription patterns (`*` matches any run)
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == channel;
    }

    let mut rest = channel;
    for (index, part) in parts.iter().enumerate() {
        if index == 0 {
            match rest.strip_prefix(part) {
                Some(remaining) => rest = remaining,
                None => return false,
            }
        } else if index == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("group:*", "group:12"));
        assert!(pattern_matches("group:*", "group:"));
        assert!(!pattern_matches("group:*", "chat_messages"));
        assert!(pattern_matches("presence", "presence"));
        assert!(!pattern_matches("presence", "presence2"));
        assert!(pattern_matches("a*c*e", "abcde"));
        assert!(!pattern_matches("a*c*e", "abdde"));
    }
}
