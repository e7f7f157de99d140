//! Abstract storage interfaces for the durable store
//!
//! The relay never owns durable state. Users, direct messages, groups,
//! memberships and group messages live behind these traits, and every
//! status or cursor change goes through a guarded write so concurrent
//! writers can never move a row backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Delivery lifecycle of a direct message. Variants are ordered: a row may
/// only move to a strictly greater status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        next > self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// User profile data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub presence_status: PresenceStatus,
    /// Set on transition to offline, cleared while online
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Direct message row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub author_id: i64,
    pub recipient_id: i64,
    pub message: Option<String>,
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub author_id: i64,
    pub recipient_id: i64,
    pub message: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGroup {
    pub id: i64,
    pub name: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Admin,
    Member,
}

/// A user's membership in a group, with its read cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: i64,
    pub user_id: i64,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
    /// High-water mark of acknowledged group messages, never decreases
    pub last_read_message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGroupMessage {
    pub id: i64,
    pub group_id: i64,
    pub author_id: i64,
    pub message: Option<String>,
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGroupMessage {
    pub group_id: i64,
    pub author_id: i64,
    pub message: Option<String>,
    pub image_url: Option<String>,
}

/// User data storage interface
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Create a new user; fails with `Conflict` on a taken username or email
    async fn create_user(&self, user: NewUser) -> Result<StoredUser>;

    /// Get user by ID
    async fn get_user(&self, user_id: i64) -> Result<Option<StoredUser>>;

    /// Get user by username
    async fn get_user_by_username(&self, username: &str) -> Result<Option<StoredUser>>;

    /// Persist a presence transition
    async fn set_presence(
        &self,
        user_id: i64,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Direct message storage interface
#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Store a new message with status `pending`; id and timestamp are assigned here
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage>;

    async fn get_message(&self, message_id: i64) -> Result<Option<StoredMessage>>;

    /// Move a message to `to` if that is a forward transition.
    /// Returns whether the row changed.
    async fn advance_message_status(&self, message_id: i64, to: DeliveryStatus) -> Result<bool>;

    /// Pending messages addressed to a user, oldest first
    async fn pending_messages_for(&self, recipient_id: i64) -> Result<Vec<StoredMessage>>;

    /// Messages addressed to a user
    async fn inbox(&self, user_id: i64) -> Result<Vec<StoredMessage>>;

    /// Messages authored by a user
    async fn sent(&self, user_id: i64) -> Result<Vec<StoredMessage>>;
}

/// Group, membership and group message storage interface
#[async_trait]
pub trait GroupStorage: Send + Sync {
    /// Create a group; its creator becomes an admin member
    async fn create_group(&self, name: &str, created_by: i64) -> Result<StoredGroup>;

    async fn get_group(&self, group_id: i64) -> Result<Option<StoredGroup>>;

    /// Add a member; fails with `Conflict` if already a member
    async fn add_member(&self, group_id: i64, user_id: i64, role: GroupRole) -> Result<GroupMembership>;

    async fn get_membership(&self, group_id: i64, user_id: i64) -> Result<Option<GroupMembership>>;

    /// All memberships held by a user
    async fn memberships_for_user(&self, user_id: i64) -> Result<Vec<GroupMembership>>;

    /// Ids of every member of a group
    async fn group_member_ids(&self, group_id: i64) -> Result<Vec<i64>>;

    /// Store a group message; ids increase monotonically across the system
    async fn create_group_message(&self, message: NewGroupMessage) -> Result<StoredGroupMessage>;

    async fn get_group_message(&self, message_id: i64) -> Result<Option<StoredGroupMessage>>;

    /// Group messages with id greater than `after_id`, ascending
    async fn group_messages_after(&self, group_id: i64, after_id: i64) -> Result<Vec<StoredGroupMessage>>;

    /// Raise a member's read cursor to `message_id`. Lower values leave the
    /// cursor untouched. Returns whether the cursor moved.
    async fn advance_read_cursor(&self, group_id: i64, user_id: i64, message_id: i64) -> Result<bool>;
}

/// Everything the relay needs from the durable store
pub trait ChatStorage: UserStorage + MessageStorage + GroupStorage {}

impl<T: UserStorage + MessageStorage + GroupStorage> ChatStorage for T {}
