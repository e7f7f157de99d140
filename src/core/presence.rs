//! Presence transitions
//!
//! A user goes online once per gateway connect and offline once per
//! disconnect. Offline transitions are always announced, even when the
//! store write fails, so peers never keep showing a stale "online".

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::broker::{Broker, BrokerEvent, PresenceEvent};
use crate::storage::{ChatStorage, PresenceStatus};

pub struct PresenceTracker {
    store: Arc<dyn ChatStorage>,
    broker: Arc<dyn Broker>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn ChatStorage>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Persist the online state. Called before the connection is registered.
    pub async fn mark_online(&self, user_id: i64) {
        if let Err(e) = self
            .store
            .set_presence(user_id, PresenceStatus::Online, None)
            .await
        {
            log::error!("Failed to persist online presence for user {}: {}", user_id, e);
        }
    }

    /// Announce the online state. Called after the connection is registered.
    pub async fn announce_online(&self, user_id: i64) {
        self.announce(user_id, PresenceStatus::Online, None).await;
    }

    /// Persist and announce the offline state, returning the `last_seen` used
    pub async fn go_offline(&self, user_id: i64) -> DateTime<Utc> {
        let last_seen = Utc::now();
        if let Err(e) = self
            .store
            .set_presence(user_id, PresenceStatus::Offline, Some(last_seen))
            .await
        {
            log::error!("Failed to persist offline presence for user {}: {}", user_id, e);
        }
        self.announce(user_id, PresenceStatus::Offline, Some(last_seen)).await;
        last_seen
    }

    async fn announce(&self, user_id: i64, status: PresenceStatus, last_seen: Option<DateTime<Utc>>) {
        let event = BrokerEvent::Presence(PresenceEvent {
            user_id,
            username: self.display_name(user_id).await,
            presence_status: status,
            last_seen,
        });
        if let Err(e) = self.broker.publish(&event).await {
            log::warn!("Failed to publish presence for user {}: {}", user_id, e);
        }
    }

    /// Username for the event, or `None` if it cannot be resolved
    async fn display_name(&self, user_id: i64) -> Option<String> {
        match self.store.get_user(user_id).await {
            Ok(user) => user.map(|u| u.username),
            Err(e) => {
                log::debug!("Could not resolve username for {}: {}", user_id, e);
                None
            }
        }
    }
}
