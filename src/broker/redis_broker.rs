//! Redis pub/sub backend

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;

use super::{Broker, RawEvent, Subscription};
use crate::error::{Result, RustyRelayError};

/// Broker backed by Redis PUBLISH / SUBSCRIBE / PSUBSCRIBE
pub struct RedisBroker {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis and prepare a publishing connection
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RustyRelayError::ConfigError(format!("Invalid redis url: {}", e)))?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        log::info!("Connected to redis broker");
        Ok(Self { client, publisher })
    }

    /// Handle for building other Redis-backed components on the same server
    pub fn client(&self) -> &redis::Client {
        &self.client
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish_raw(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        log::trace!("Published on {} to {} subscribers", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str], patterns: &[&str]) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(*channel).await?;
        }
        for pattern in patterns {
            pubsub.psubscribe(*pattern).await?;
        }

        Ok(Box::new(RedisSubscription {
            pubsub,
            channels: channels.iter().map(|c| c.to_string()).collect(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }))
    }
}

struct RedisSubscription {
    pubsub: PubSub,
    channels: Vec<String>,
    patterns: Vec<String>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_event(&mut self) -> Option<RawEvent> {
        let stream = self.pubsub.on_message();
        futures_util::pin_mut!(stream);
        loop {
            let msg = stream.next().await?;
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    return Some(RawEvent {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    })
                }
                Err(e) => {
                    log::debug!("Dropping non-text payload on {}: {}", msg.get_channel_name(), e);
                }
            }
        }
    }

    async fn close(mut self: Box<Self>) {
        if !self.channels.is_empty() {
            if let Err(e) = self.pubsub.unsubscribe(&self.channels).await {
                log::warn!("Failed to unsubscribe from {:?}: {}", self.channels, e);
            }
        }
        if !self.patterns.is_empty() {
            if let Err(e) = self.pubsub.punsubscribe(&self.patterns).await {
                log::warn!("Failed to unsubscribe from patterns {:?}: {}", self.patterns, e);
            }
        }
        log::debug!("Redis subscription closed");
    }
}
