//! In-memory storage implementation for development and testing
//!
//! All tables sit behind one lock so every write is serialized, which is
//! what the relay expects from a transactional store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::traits::*;
use crate::error::{Result, RustyRelayError};

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i64, StoredUser>,
    messages: BTreeMap<i64, StoredMessage>,
    groups: BTreeMap<i64, StoredGroup>,
    memberships: HashMap<(i64, i64), GroupMembership>,
    group_messages: BTreeMap<i64, StoredGroupMessage>,
    next_user_id: i64,
    next_message_id: i64,
    next_group_id: i64,
    next_group_message_id: i64,
}

impl MemoryState {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn insert_membership(&mut self, group_id: i64, user_id: i64, role: GroupRole) -> GroupMembership {
        let membership = GroupMembership {
            group_id,
            user_id,
            role,
            joined_at: Utc::now(),
            last_read_message_id: 0,
        };
        self.memberships.insert((group_id, user_id), membership.clone());
        membership
    }
}

/// In-memory implementation of every storage trait
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStorage for MemoryStorage {
    async fn create_user(&self, user: NewUser) -> Result<StoredUser> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(RustyRelayError::Conflict(
                "Username or email already exists".to_string(),
            ));
        }

        let id = MemoryState::next_id(&mut state.next_user_id);
        let stored = StoredUser {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            presence_status: PresenceStatus::Offline,
            last_seen: None,
            created_at: Utc::now(),
        };
        state.users.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<StoredUser>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<StoredUser>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn set_presence(
        &self,
        user_id: i64,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RustyRelayError::NotFound(format!("user {}", user_id)))?;
        user.presence_status = status;
        user.last_seen = match status {
            PresenceStatus::Online => None,
            PresenceStatus::Offline => last_seen,
        };
        Ok(())
    }
}

#[async_trait]
impl MessageStorage for MemoryStorage {
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let mut state = self.state.write().await;
        let id = MemoryState::next_id(&mut state.next_message_id);
        let stored = StoredMessage {
            id,
            author_id: message.author_id,
            recipient_id: message.recipient_id,
            message: message.message,
            image_url: message.image_url,
            timestamp: Utc::now(),
            status: DeliveryStatus::Pending,
        };
        state.messages.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<StoredMessage>> {
        Ok(self.state.read().await.messages.get(&message_id).cloned())
    }

    async fn advance_message_status(&self, message_id: i64, to: DeliveryStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.messages.get_mut(&message_id) {
            Some(message) if message.status.can_advance_to(to) => {
                message.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RustyRelayError::NotFound(format!("message {}", message_id))),
        }
    }

    async fn pending_messages_for(&self, recipient_id: i64) -> Result<Vec<StoredMessage>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .filter(|m| m.recipient_id == recipient_id && m.status == DeliveryStatus::Pending)
            .cloned()
            .collect())
    }

    async fn inbox(&self, user_id: i64) -> Result<Vec<StoredMessage>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .filter(|m| m.recipient_id == user_id)
            .cloned()
            .collect())
    }

    async fn sent(&self, user_id: i64) -> Result<Vec<StoredMessage>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .filter(|m| m.author_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupStorage for MemoryStorage {
    async fn create_group(&self, name: &str, created_by: i64) -> Result<StoredGroup> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&created_by) {
            return Err(RustyRelayError::NotFound(format!("user {}", created_by)));
        }

        let id = MemoryState::next_id(&mut state.next_group_id);
        let group = StoredGroup {
            id,
            name: name.to_string(),
            created_by,
            created_at: Utc::now(),
        };
        state.groups.insert(id, group.clone());
        state.insert_membership(id, created_by, GroupRole::Admin);
        Ok(group)
    }

    async fn get_group(&self, group_id: i64) -> Result<Option<StoredGroup>> {
        Ok(self.state.read().await.groups.get(&group_id).cloned())
    }

    async fn add_member(&self, group_id: i64, user_id: i64, role: GroupRole) -> Result<GroupMembership> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(&group_id) {
            return Err(RustyRelayError::NotFound(format!("group {}", group_id)));
        }
        if !state.users.contains_key(&user_id) {
            return Err(RustyRelayError::NotFound(format!("user {}", user_id)));
        }
        if state.memberships.contains_key(&(group_id, user_id)) {
            return Err(RustyRelayError::Conflict(format!(
                "user {} is already a member of group {}",
                user_id, group_id
            )));
        }
        Ok(state.insert_membership(group_id, user_id, role))
    }

    async fn get_membership(&self, group_id: i64, user_id: i64) -> Result<Option<GroupMembership>> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .get(&(group_id, user_id))
            .cloned())
    }

    async fn memberships_for_user(&self, user_id: i64) -> Result<Vec<GroupMembership>> {
        let state = self.state.read().await;
        let mut memberships: Vec<GroupMembership> = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| m.group_id);
        Ok(memberships)
    }

    async fn group_member_ids(&self, group_id: i64) -> Result<Vec<i64>> {
        let state = self.state.read().await;
        let mut ids: Vec<i64> = state
            .memberships
            .keys()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, user_id)| *user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn create_group_message(&self, message: NewGroupMessage) -> Result<StoredGroupMessage> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(&message.group_id) {
            return Err(RustyRelayError::NotFound(format!("group {}", message.group_id)));
        }

        let id = MemoryState::next_id(&mut state.next_group_message_id);
        let stored = StoredGroupMessage {
            id,
            group_id: message.group_id,
            author_id: message.author_id,
            message: message.message,
            image_url: message.image_url,
            timestamp: Utc::now(),
        };
        state.group_messages.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_group_message(&self, message_id: i64) -> Result<Option<StoredGroupMessage>> {
        Ok(self.state.read().await.group_messages.get(&message_id).cloned())
    }

    async fn group_messages_after(&self, group_id: i64, after_id: i64) -> Result<Vec<StoredGroupMessage>> {
        let state = self.state.read().await;
        Ok(state
            .group_messages
            .range(after_id.saturating_add(1)..)
            .map(|(_, m)| m)
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn advance_read_cursor(&self, group_id: i64, user_id: i64, message_id: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        let membership = state
            .memberships
            .get_mut(&(group_id, user_id))
            .ok_or_else(|| {
                RustyRelayError::NotFound(format!("membership ({}, {})", group_id, user_id))
            })?;
        if message_id > membership.last_read_message_id {
            membership.last_read_message_id = message_id;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn user(store: &MemoryStorage, name: &str) -> StoredUser {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password_hash: "x".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStorage::new();
        user(&store, "alice").await;
        let result = store
            .create_user(NewUser {
                username: "alice".to_string(),
                email: "other@example.com".to_string(),
                password_hash: "x".to_string(),
            })
            .await;
        assert!(matches!(result, Err(RustyRelayError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_message_status_never_moves_backwards() {
        let store = MemoryStorage::new();
        let a = user(&store, "a").await;
        let b = user(&store, "b").await;
        let msg = store
            .create_message(NewMessage {
                author_id: a.id,
                recipient_id: b.id,
                message: Some("hi".to_string()),
                image_url: None,
            })
            .await
            .unwrap();
        assert_eq!(msg.status, DeliveryStatus::Pending);

        assert!(store.advance_message_status(msg.id, DeliveryStatus::Read).await.unwrap());
        assert!(!store.advance_message_status(msg.id, DeliveryStatus::Delivered).await.unwrap());
        assert!(!store.advance_message_status(msg.id, DeliveryStatus::Pending).await.unwrap());

        let stored = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn test_read_cursor_is_monotonic() {
        let store = MemoryStorage::new();
        let owner = user(&store, "owner").await;
        let group = store.create_group("team", owner.id).await.unwrap();

        assert!(store.advance_read_cursor(group.id, owner.id, 5).await.unwrap());
        assert!(!store.advance_read_cursor(group.id, owner.id, 3).await.unwrap());
        let membership = store.get_membership(group.id, owner.id).await.unwrap().unwrap();
        assert_eq!(membership.last_read_message_id, 5);
        assert_eq!(membership.role, GroupRole::Admin);
    }

    #[tokio::test]
    async fn test_presence_clears_last_seen_while_online() {
        let store = MemoryStorage::new();
        let a = user(&store, "a").await;

        store.set_presence(a.id, PresenceStatus::Offline, Some(Utc::now())).await.unwrap();
        assert!(store.get_user(a.id).await.unwrap().unwrap().last_seen.is_some());

        store.set_presence(a.id, PresenceStatus::Online, Some(Utc::now())).await.unwrap();
        let stored = store.get_user(a.id).await.unwrap().unwrap();
        assert_eq!(stored.presence_status, PresenceStatus::Online);
        assert!(stored.last_seen.is_none());
    }

    #[tokio::test]
    async fn test_group_messages_after_filters_by_group() {
        let store = MemoryStorage::new();
        let owner = user(&store, "owner").await;
        let g1 = store.create_group("one", owner.id).await.unwrap();
        let g2 = store.create_group("two", owner.id).await.unwrap();

        for group_id in [g1.id, g2.id, g1.id] {
            store
                .create_group_message(NewGroupMessage {
                    group_id,
                    author_id: owner.id,
                    message: Some("m".to_string()),
                    image_url: None,
                })
                .await
                .unwrap();
        }

        let after: Vec<i64> = store
            .group_messages_after(g1.id, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(after, vec![3]);
    }
}
