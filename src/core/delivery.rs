//! Delivery engine: the direct-message, read-receipt and group-message
//! state machines.
//!
//! A direct message moves `pending -> delivered -> read` and never back.
//! The engine is the only writer of those transitions; it relies on the
//! store's guarded updates instead of locking. Actual pushes to sockets
//! happen in each instance's subscriber loop, never here, except for the
//! backlog replayed to a freshly connected user.

use std::sync::Arc;

use crate::broker::{
    Broker, BrokerEvent, DirectMessageEvent, GroupMessageEvent, GroupReadEvent, ReadReceiptEvent,
};
use crate::config::RateLimitPolicy;
use crate::constants::{SEND_GROUP_MESSAGE_ACTION, SEND_MESSAGE_ACTION};
use crate::core::connection::Connection;
use crate::core::message_types::{
    normalize_payload, AckStatus, DirectMessageFrame, GroupMessageFrame, GroupReadFrame, ReadFrame,
    ServerFrame,
};
use crate::core::rate_limiter::RateLimiter;
use crate::core::registry::SharedRegistry;
use crate::error::{Result, RustyRelayError, ValidationKind};
use crate::storage::{ChatStorage, DeliveryStatus, NewGroupMessage, NewMessage, StoredMessage};

/// What was pushed during a backlog replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BacklogReport {
    pub direct_messages: usize,
    pub group_messages: usize,
}

pub struct DeliveryEngine {
    store: Arc<dyn ChatStorage>,
    broker: Arc<dyn Broker>,
    registry: SharedRegistry,
    limiter: Arc<RateLimiter>,
    message_policy: RateLimitPolicy,
    group_policy: RateLimitPolicy,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn ChatStorage>,
        broker: Arc<dyn Broker>,
        registry: SharedRegistry,
        limiter: Arc<RateLimiter>,
        message_policy: RateLimitPolicy,
        group_policy: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            broker,
            registry,
            limiter,
            message_policy,
            group_policy,
        }
    }

    /// Send a direct message and return the sender's acknowledgement.
    ///
    /// The status in the ack and in the fanout event only reflects whether
    /// this instance holds the recipient's connection. A recipient connected
    /// elsewhere still gets the live push from its own instance.
    pub async fn send(&self, author_id: i64, frame: DirectMessageFrame) -> Result<ServerFrame> {
        let stored = self.persist(author_id, frame).await?;

        let provisional = if self.registry.is_online(stored.recipient_id).await {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Pending
        };

        let event = BrokerEvent::Message(DirectMessageEvent::from_stored(&stored, provisional));
        let mut status = match self.broker.publish(&event).await {
            Ok(()) => provisional,
            Err(e) => {
                // Stays pending and is replayed on the recipient's next connect
                log::warn!("Failed to publish message {}: {}", stored.id, e);
                DeliveryStatus::Pending
            }
        };

        if status == DeliveryStatus::Delivered {
            if let Err(e) = self
                .store
                .advance_message_status(stored.id, DeliveryStatus::Delivered)
                .await
            {
                log::error!("Failed to mark message {} delivered: {}", stored.id, e);
                status = DeliveryStatus::Pending;
            }
        }

        log::debug!(
            "Message {} from {} to {} is {}",
            stored.id,
            author_id,
            stored.recipient_id,
            status.as_str()
        );
        Ok(ServerFrame::Ack {
            message_id: stored.id,
            status: AckStatus::from(status),
        })
    }

    /// Validate, rate-limit and store a direct message as pending without
    /// pushing it. The recipient receives it with the next backlog replay.
    pub async fn persist(&self, author_id: i64, frame: DirectMessageFrame) -> Result<StoredMessage> {
        let (message, image_url) = normalize_payload(frame.message, frame.image_url)?;
        if self.store.get_user(frame.recipient_id).await?.is_none() {
            return Err(RustyRelayError::ValidationError(ValidationKind::UnknownRecipient));
        }

        if !self
            .limiter
            .check(author_id, SEND_MESSAGE_ACTION, self.message_policy)
            .await
        {
            return Err(RustyRelayError::RateLimited(SEND_MESSAGE_ACTION.to_string()));
        }

        self.store
            .create_message(NewMessage {
                author_id,
                recipient_id: frame.recipient_id,
                message,
                image_url,
            })
            .await
    }

    /// Apply a read receipt. Unknown messages, receipts from anyone but the
    /// recipient and repeated receipts are ignored without an error.
    pub async fn mark_read(&self, reader_id: i64, frame: ReadFrame) -> Result<()> {
        let Some(message) = self.store.get_message(frame.message_id).await? else {
            log::debug!("Read receipt for unknown message {}", frame.message_id);
            return Ok(());
        };
        if message.recipient_id != reader_id || message.status == DeliveryStatus::Read {
            return Ok(());
        }

        if !self
            .store
            .advance_message_status(message.id, DeliveryStatus::Read)
            .await?
        {
            return Ok(());
        }

        let event = BrokerEvent::ReadReceipt(ReadReceiptEvent {
            message_id: message.id,
            reader_id,
            author_id: message.author_id,
        });
        if let Err(e) = self.broker.publish(&event).await {
            log::warn!("Failed to publish read receipt for {}: {}", message.id, e);
        }
        Ok(())
    }

    /// Send a message to a group the author belongs to
    pub async fn send_group(&self, author_id: i64, frame: GroupMessageFrame) -> Result<ServerFrame> {
        let (message, image_url) = normalize_payload(frame.message, frame.image_url)?;
        if self
            .store
            .get_membership(frame.group_id, author_id)
            .await?
            .is_none()
        {
            return Err(RustyRelayError::NotAMember {
                group_id: frame.group_id,
            });
        }

        if !self
            .limiter
            .check(author_id, SEND_GROUP_MESSAGE_ACTION, self.group_policy)
            .await
        {
            return Err(RustyRelayError::RateLimited(
                SEND_GROUP_MESSAGE_ACTION.to_string(),
            ));
        }

        let stored = self
            .store
            .create_group_message(NewGroupMessage {
                group_id: frame.group_id,
                author_id,
                message,
                image_url,
            })
            .await?;

        let event = BrokerEvent::GroupMessage(GroupMessageEvent::from(&stored));
        if let Err(e) = self.broker.publish(&event).await {
            log::warn!("Failed to publish group message {}: {}", stored.id, e);
        }

        Ok(ServerFrame::Ack {
            message_id: stored.id,
            status: AckStatus::Sent,
        })
    }

    /// Advance the reader's cursor in a group. Authors cannot acknowledge
    /// their own messages; a cursor value at or below the current one is a no-op.
    pub async fn group_read(&self, reader_id: i64, frame: GroupReadFrame) -> Result<()> {
        if self
            .store
            .get_membership(frame.group_id, reader_id)
            .await?
            .is_none()
        {
            log::debug!("Group read from non-member {} in {}", reader_id, frame.group_id);
            return Ok(());
        }

        let message = match self.store.get_group_message(frame.message_id).await? {
            Some(message) if message.group_id == frame.group_id => message,
            _ => return Ok(()),
        };
        if message.author_id == reader_id {
            return Err(RustyRelayError::CannotReadOwnMessage);
        }

        if !self
            .store
            .advance_read_cursor(frame.group_id, reader_id, message.id)
            .await?
        {
            return Ok(());
        }

        let event = BrokerEvent::GroupRead(GroupReadEvent {
            group_id: frame.group_id,
            reader_id,
            message_id: message.id,
        });
        if let Err(e) = self.broker.publish(&event).await {
            log::warn!("Failed to publish group read for {}: {}", message.id, e);
        }
        Ok(())
    }

    /// Push everything a user missed while unreachable.
    ///
    /// Pending direct messages are pushed and then marked delivered one by
    /// one. Group messages past each membership cursor are pushed in order and
    /// the cursor is raised once the whole batch went out.
    pub async fn replay_backlog(&self, connection: &Connection) -> Result<BacklogReport> {
        let user_id = connection.user_id;
        let mut report = BacklogReport::default();

        for message in self.store.pending_messages_for(user_id).await? {
            let frame = ServerFrame::Message(DirectMessageEvent::from_stored(
                &message,
                DeliveryStatus::Delivered,
            ));
            if !connection.send_json(&frame) {
                return Err(RustyRelayError::ConnectionClosed);
            }
            self.store
                .advance_message_status(message.id, DeliveryStatus::Delivered)
                .await?;
            report.direct_messages += 1;
        }

        for membership in self.store.memberships_for_user(user_id).await? {
            let backlog = self
                .store
                .group_messages_after(membership.group_id, membership.last_read_message_id)
                .await?;
            let Some(last_id) = backlog.last().map(|m| m.id) else {
                continue;
            };

            for message in backlog.iter().filter(|m| m.author_id != user_id) {
                let frame = ServerFrame::GroupMessage(GroupMessageEvent::from(message));
                if !connection.send_json(&frame) {
                    return Err(RustyRelayError::ConnectionClosed);
                }
                report.group_messages += 1;
            }

            self.store
                .advance_read_cursor(membership.group_id, user_id, last_id)
                .await?;
        }

        if report.direct_messages + report.group_messages > 0 {
            log::info!(
                "Replayed backlog to user {}: {} direct, {} group",
                user_id,
                report.direct_messages,
                report.group_messages
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, Subscription};
    use crate::core::rate_limiter::MemoryCounterStore;
    use crate::core::registry::ConnectionRegistry;
    use crate::storage::{
        GroupRole, GroupStorage, MemoryStorage, MessageStorage, NewUser, UserStorage,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;
    use warp::ws::Message;

    struct Fixture {
        store: Arc<MemoryStorage>,
        broker: Arc<MemoryBroker>,
        registry: SharedRegistry,
        engine: DeliveryEngine,
    }

    async fn fixture(limit: u64) -> Fixture {
        let store = Arc::new(MemoryStorage::new());
        let broker = Arc::new(MemoryBroker::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryCounterStore::new())));
        let policy = RateLimitPolicy::new(limit, Duration::from_secs(60));
        let engine = DeliveryEngine::new(
            store.clone(),
            broker.clone(),
            registry.clone(),
            limiter,
            policy,
            policy,
        );
        for name in ["one", "two", "three"] {
            store
                .create_user(NewUser {
                    username: name.to_string(),
                    email: format!("{}@example.com", name),
                    password_hash: "x".to_string(),
                })
                .await
                .unwrap();
        }
        Fixture {
            store,
            broker,
            registry,
            engine,
        }
    }

    fn text(recipient_id: i64, body: &str) -> DirectMessageFrame {
        DirectMessageFrame {
            recipient_id,
            message: Some(body.to_string()),
            image_url: None,
        }
    }

    async fn next_event(sub: &mut Box<dyn Subscription>) -> BrokerEvent {
        let raw = sub.next_event().await.unwrap();
        serde_json::from_str(&raw.payload).unwrap()
    }

    fn decode(msg: Message) -> serde_json::Value {
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_send_to_offline_recipient_stays_pending() {
        let f = fixture(20).await;
        let mut sub = f.broker.subscribe(&["chat_messages"], &[]).await.unwrap();

        let ack = f.engine.send(1, text(2, "hi")).await.unwrap();
        let ServerFrame::Ack { message_id, status } = ack else {
            panic!("expected ack");
        };
        assert_eq!(status, AckStatus::Pending);

        let stored = f.store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);

        match next_event(&mut sub).await {
            BrokerEvent::Message(event) => {
                assert_eq!(event.message_id, message_id);
                assert_eq!(event.status, DeliveryStatus::Pending);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_to_local_recipient_is_delivered() {
        let f = fixture(20).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        f.registry.register(Connection::new(2, tx)).await;

        let ServerFrame::Ack { message_id, status } = f.engine.send(1, text(2, "hi")).await.unwrap() else {
            panic!("expected ack");
        };
        assert_eq!(status, AckStatus::Delivered);
        let stored = f.store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_without_persisting() {
        let f = fixture(20).await;
        let frame = DirectMessageFrame {
            recipient_id: 2,
            message: Some("   ".to_string()),
            image_url: None,
        };
        let err = f.engine.send(1, frame).await.unwrap_err();
        assert_eq!(err.error_reason(), "empty_message");
        assert!(f.store.sent(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_recipient_rejected() {
        let f = fixture(20).await;
        let err = f.engine.send(1, text(42, "hi")).await.unwrap_err();
        assert_eq!(err.error_reason(), "unknown_recipient");
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_persistence() {
        let f = fixture(2).await;
        f.engine.send(1, text(2, "a")).await.unwrap();
        f.engine.send(1, text(2, "b")).await.unwrap();
        let err = f.engine.send(1, text(2, "c")).await.unwrap_err();
        assert_eq!(err.error_reason(), "rate_limited");
        assert_eq!(f.store.sent(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persist_stores_pending_without_fanout() {
        let f = fixture(2).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.registry.register(Connection::new(2, tx)).await;
        let mut sub = f.broker.subscribe(&["chat_messages"], &[]).await.unwrap();

        let stored = f.engine.persist(1, text(2, " later ")).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.message.as_deref(), Some("later"));
        assert!(rx.try_recv().is_err());
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.next_event())
            .await
            .is_err());

        // Shares the direct message quota with the gateway
        f.engine.send(1, text(2, "now")).await.unwrap();
        let err = f.engine.persist(1, text(2, "over")).await.unwrap_err();
        assert_eq!(err.error_reason(), "rate_limited");
        assert!(f.engine.persist(1, text(99, "x")).await.is_err());
    }

    #[tokio::test]
    async fn test_read_receipt_only_from_recipient() {
        let f = fixture(20).await;
        let mut sub = f.broker.subscribe(&["read_receipt"], &[]).await.unwrap();
        let ServerFrame::Ack { message_id, .. } = f.engine.send(1, text(2, "hi")).await.unwrap() else {
            panic!("expected ack");
        };

        // Not the recipient: silently ignored
        f.engine.mark_read(3, ReadFrame { message_id }).await.unwrap();
        assert_eq!(
            f.store.get_message(message_id).await.unwrap().unwrap().status,
            DeliveryStatus::Pending
        );

        // Unknown message: silently ignored
        f.engine.mark_read(2, ReadFrame { message_id: 999 }).await.unwrap();

        f.engine.mark_read(2, ReadFrame { message_id }).await.unwrap();
        assert_eq!(
            f.store.get_message(message_id).await.unwrap().unwrap().status,
            DeliveryStatus::Read
        );

        // Second receipt publishes nothing
        f.engine.mark_read(2, ReadFrame { message_id }).await.unwrap();

        match next_event(&mut sub).await {
            BrokerEvent::ReadReceipt(receipt) => {
                assert_eq!(receipt.message_id, message_id);
                assert_eq!(receipt.reader_id, 2);
                assert_eq!(receipt.author_id, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        let extra = tokio::time::timeout(Duration::from_millis(50), sub.next_event()).await;
        assert!(extra.is_err(), "only one receipt may be published");
    }

    #[tokio::test]
    async fn test_group_send_requires_membership() {
        let f = fixture(20).await;
        let group = f.store.create_group("team", 1).await.unwrap();
        let frame = GroupMessageFrame {
            group_id: group.id,
            message: Some("hello".to_string()),
            image_url: None,
        };
        let err = f.engine.send_group(2, frame.clone()).await.unwrap_err();
        assert_eq!(err.error_reason(), "not_a_member");

        let ack = f.engine.send_group(1, frame).await.unwrap();
        assert!(matches!(ack, ServerFrame::Ack { status: AckStatus::Sent, .. }));
    }

    #[tokio::test]
    async fn test_group_read_rules() {
        let f = fixture(20).await;
        let group = f.store.create_group("team", 1).await.unwrap();
        f.store.add_member(group.id, 2, GroupRole::Member).await.unwrap();
        let mut sub = f.broker.subscribe(&[], &["group:*"]).await.unwrap();

        let frame = GroupMessageFrame {
            group_id: group.id,
            message: Some("hello".to_string()),
            image_url: None,
        };
        let ServerFrame::Ack { message_id, .. } = f.engine.send_group(1, frame).await.unwrap() else {
            panic!("expected ack");
        };
        assert!(matches!(next_event(&mut sub).await, BrokerEvent::GroupMessage(_)));

        // The author cannot acknowledge their own message
        let err = f
            .engine
            .group_read(1, GroupReadFrame { group_id: group.id, message_id })
            .await
            .unwrap_err();
        assert_eq!(err.error_reason(), "cannot_read_own_message");
        let author = f.store.get_membership(group.id, 1).await.unwrap().unwrap();
        assert_eq!(author.last_read_message_id, 0);

        f.engine
            .group_read(2, GroupReadFrame { group_id: group.id, message_id })
            .await
            .unwrap();
        let member = f.store.get_membership(group.id, 2).await.unwrap().unwrap();
        assert_eq!(member.last_read_message_id, message_id);
        match next_event(&mut sub).await {
            BrokerEvent::GroupRead(event) => {
                assert_eq!(event.reader_id, 2);
                assert_eq!(event.message_id, message_id);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backlog_replayed_once_and_marked_delivered() {
        let f = fixture(20).await;
        let ServerFrame::Ack { message_id, .. } = f.engine.send(1, text(2, "while away")).await.unwrap() else {
            panic!("expected ack");
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(2, tx);
        let report = f.engine.replay_backlog(&conn).await.unwrap();
        assert_eq!(report.direct_messages, 1);

        let frame = decode(rx.try_recv().unwrap());
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["message_id"], message_id);
        assert_eq!(frame["status"], "delivered");
        assert_eq!(
            f.store.get_message(message_id).await.unwrap().unwrap().status,
            DeliveryStatus::Delivered
        );

        let again = f.engine.replay_backlog(&conn).await.unwrap();
        assert_eq!(again, BacklogReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_group_backlog_skips_own_messages_and_advances_cursor() {
        let f = fixture(20).await;
        let group = f.store.create_group("team", 1).await.unwrap();
        f.store.add_member(group.id, 2, GroupRole::Member).await.unwrap();

        for (author, body) in [(1, "from one"), (2, "from two"), (1, "again")] {
            f.engine
                .send_group(
                    author,
                    GroupMessageFrame {
                        group_id: group.id,
                        message: Some(body.to_string()),
                        image_url: None,
                    },
                )
                .await
                .unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = f.engine.replay_backlog(&Connection::new(2, tx)).await.unwrap();
        assert_eq!(report.group_messages, 2);
        assert_eq!(decode(rx.try_recv().unwrap())["message"], "from one");
        assert_eq!(decode(rx.try_recv().unwrap())["message"], "again");

        let member = f.store.get_membership(group.id, 2).await.unwrap().unwrap();
        assert_eq!(member.last_read_message_id, 3);
    }

    #[tokio::test]
    async fn test_backlog_stops_on_dead_connection() {
        let f = fixture(20).await;
        let ServerFrame::Ack { message_id, .. } = f.engine.send(1, text(2, "hi")).await.unwrap() else {
            panic!("expected ack");
        };

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(f.engine.replay_backlog(&Connection::new(2, tx)).await.is_err());
        assert_eq!(
            f.store.get_message(message_id).await.unwrap().unwrap().status,
            DeliveryStatus::Pending
        );
    }
}
