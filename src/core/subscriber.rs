//! Broker subscriber loop
//!
//! One loop per instance. It decodes every event received from the broker
//! and pushes it to whichever of the concerned users this instance holds.
//! A bad event is logged and dropped; only shutdown ends the loop.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Broker, BrokerEvent, RawEvent, Subscription};
use crate::constants::{CHAT_CHANNEL, GROUP_CHANNEL_PATTERN, PRESENCE_CHANNEL, READ_CHANNEL};
use crate::core::registry::SharedRegistry;
use crate::error::Result;
use crate::storage::ChatStorage;

/// Routes decoded events to local connections
pub struct EventDispatcher {
    registry: SharedRegistry,
    store: Arc<dyn ChatStorage>,
}

impl EventDispatcher {
    pub fn new(registry: SharedRegistry, store: Arc<dyn ChatStorage>) -> Self {
        Self { registry, store }
    }

    /// Push an event to its local targets, returning how many were reached
    pub async fn dispatch(&self, event: &BrokerEvent) -> Result<usize> {
        let text = serde_json::to_string(event)?;

        let delivered = match event {
            BrokerEvent::Message(e) => self.registry.send_to(e.recipient_id, &text).await as usize,
            BrokerEvent::Presence(e) => self.registry.broadcast_except(e.user_id, &text).await,
            BrokerEvent::ReadReceipt(e) => self.registry.send_to(e.author_id, &text).await as usize,
            BrokerEvent::GroupMessage(e) => self.fan_out(e.group_id, e.author_id, &text).await?,
            BrokerEvent::GroupRead(e) => self.fan_out(e.group_id, e.reader_id, &text).await?,
        };
        Ok(delivered)
    }

    /// Push to every locally connected member of a group except `skip_user_id`
    async fn fan_out(&self, group_id: i64, skip_user_id: i64, text: &str) -> Result<usize> {
        if self.registry.connection_count().await == 0 {
            return Ok(0);
        }

        let mut delivered = 0;
        for member_id in self.store.group_member_ids(group_id).await? {
            if member_id == skip_user_id || !self.registry.is_online(member_id).await {
                continue;
            }
            if self.registry.send_to(member_id, text).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn handle_raw(&self, raw: RawEvent) {
        let event: BrokerEvent = match serde_json::from_str(&raw.payload) {
            Ok(event) => event,
            Err(e) => {
                log::debug!("Dropping malformed event on {}: {}", raw.channel, e);
                return;
            }
        };

        match AssertUnwindSafe(self.dispatch(&event)).catch_unwind().await {
            Ok(Ok(count)) => {
                log::trace!("Dispatched {} event to {} local connections", event.kind(), count)
            }
            Ok(Err(e)) => log::error!("Failed to dispatch {} event: {}", event.kind(), e),
            Err(_) => log::error!("Panic while dispatching {} event", event.kind()),
        }
    }
}

/// Consume a subscription until it ends or shutdown is signalled
pub async fn run_subscriber(
    mut subscription: Box<dyn Subscription>,
    dispatcher: Arc<EventDispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    log::info!("Subscriber loop started");
    loop {
        tokio::select! {
            raw = subscription.next_event() => {
                match raw {
                    Some(raw) => dispatcher.handle_raw(raw).await,
                    None => {
                        log::warn!("Broker subscription ended");
                        break;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                // A dropped sender means the owning handle is gone
                if changed.is_err() || *shutdown_rx.borrow() { break; }
            }
        }
    }
    subscription.close().await;
    log::info!("Subscriber loop stopped");
}

/// Owns the running subscriber task
pub struct SubscriberHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    /// Subscribe to every fanout channel and start the loop
    pub async fn spawn(broker: Arc<dyn Broker>, dispatcher: Arc<EventDispatcher>) -> Result<Self> {
        let subscription = broker
            .subscribe(
                &[CHAT_CHANNEL, PRESENCE_CHANNEL, READ_CHANNEL],
                &[GROUP_CHANNEL_PATTERN],
            )
            .await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_subscriber(subscription, dispatcher, shutdown_rx));
        Ok(Self { shutdown_tx, task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop and wait for it to unsubscribe
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            log::error!("Subscriber task failed: {}", e);
        }
    }
}
