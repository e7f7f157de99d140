//! Per-instance registry of live connections
//!
//! Maps a user id to the one connection this instance holds for it. Only the
//! owning instance's gateway sessions and subscriber loop touch it; other
//! instances learn about these users through the broker.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::connection::Connection;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<i64, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning the one it superseded, if any
    pub async fn register(&self, connection: Connection) -> Option<Connection> {
        let mut connections = self.connections.write().await;
        let previous = connections.insert(connection.user_id, connection);
        log::debug!("Registry now holds {} connections", connections.len());
        previous
    }

    /// Remove the entry for `user_id` if it still belongs to `connection_id`.
    /// Returns false when the entry is gone or was replaced by a newer connection.
    pub async fn unregister(&self, user_id: i64, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id == connection_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// End a session's hold on `user_id`. Returns true when the user should
    /// go offline: the entry was this connection, or it was already evicted.
    /// Returns false only when a different connection has taken its place.
    pub async fn release(&self, user_id: i64, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id != connection_id => false,
            Some(_) => {
                connections.remove(&user_id);
                true
            }
            None => true,
        }
    }

    pub async fn lookup(&self, user_id: i64) -> Option<Connection> {
        self.connections.read().await.get(&user_id).cloned()
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    /// Push a text frame to a locally connected user.
    /// A failed push evicts the connection; nothing is retried.
    pub async fn send_to(&self, user_id: i64, text: &str) -> bool {
        let Some(connection) = self.lookup(user_id).await else {
            return false;
        };
        if connection.send_text(text) {
            return true;
        }

        if self.unregister(user_id, &connection.id).await {
            log::warn!("Evicted dead connection for user {}", user_id);
        }
        false
    }

    /// Push a text frame to every local user except `except_user_id`
    pub async fn broadcast_except(&self, except_user_id: i64, text: &str) -> usize {
        let targets: Vec<Connection> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|c| c.user_id != except_user_id)
                .cloned()
                .collect()
        };

        let mut sent = 0;
        for connection in targets {
            if connection.send_text(text) {
                sent += 1;
            } else if self.unregister(connection.user_id, &connection.id).await {
                log::warn!("Evicted dead connection for user {}", connection.user_id);
            }
        }
        sent
    }

    pub async fn online_user_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.connections.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

// Shared reference to the registry
pub type SharedRegistry = Arc<ConnectionRegistry>;
