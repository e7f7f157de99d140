//! Wire schema of events carried between instances
//!
//! Every event is a JSON object with a `type` discriminator. The same
//! objects are pushed unchanged to the clients they concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{group_channel, CHAT_CHANNEL, PRESENCE_CHANNEL, READ_CHANNEL};
use crate::storage::{DeliveryStatus, PresenceStatus, StoredGroupMessage, StoredMessage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessageEvent {
    pub message_id: i64,
    pub author_id: i64,
    pub recipient_id: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl DirectMessageEvent {
    /// Event for a stored message, carrying `status` rather than the row's
    pub fn from_stored(message: &StoredMessage, status: DeliveryStatus) -> Self {
        Self {
            message_id: message.id,
            author_id: message.author_id,
            recipient_id: message.recipient_id,
            message: message.message.clone(),
            image_url: message.image_url.clone(),
            timestamp: message.timestamp,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub presence_status: PresenceStatus,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceiptEvent {
    pub message_id: i64,
    pub reader_id: i64,
    pub author_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessageEvent {
    pub message_id: i64,
    pub group_id: i64,
    pub author_id: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&StoredGroupMessage> for GroupMessageEvent {
    fn from(message: &StoredGroupMessage) -> Self {
        Self {
            message_id: message.id,
            group_id: message.group_id,
            author_id: message.author_id,
            message: message.message.clone(),
            image_url: message.image_url.clone(),
            timestamp: message.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReadEvent {
    pub group_id: i64,
    pub reader_id: i64,
    pub message_id: i64,
}

/// Event published through the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    Message(DirectMessageEvent),
    Presence(PresenceEvent),
    ReadReceipt(ReadReceiptEvent),
    GroupMessage(GroupMessageEvent),
    GroupRead(GroupReadEvent),
}

impl BrokerEvent {
    /// Channel this event is published on
    pub fn channel(&self) -> String {
        match self {
            Self::Message(_) => CHAT_CHANNEL.to_string(),
            Self::Presence(_) => PRESENCE_CHANNEL.to_string(),
            Self::ReadReceipt(_) => READ_CHANNEL.to_string(),
            Self::GroupMessage(event) => group_channel(event.group_id),
            Self::GroupRead(event) => group_channel(event.group_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Presence(_) => "presence",
            Self::ReadReceipt(_) => "read_receipt",
            Self::GroupMessage(_) => "group_message",
            Self::GroupRead(_) => "group_read",
        }
    }
}
