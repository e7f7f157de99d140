//! WebSocket connection handle
//! Owned by the gateway session that accepted the socket

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::Message;

/// Outbound side of one accepted WebSocket
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: String,
    pub user_id: i64,
    pub sender: mpsc::UnboundedSender<Message>,
    pub connected_at: Instant,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(user_id: i64, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Send a text message through this connection
    pub fn send_text(&self, text: &str) -> bool {
        match self.sender.send(Message::text(text)) {
            Ok(_) => true,
            Err(_) => {
                log::warn!("Failed to send message to user {} ({})", self.user_id, self.id);
                false
            }
        }
    }

    /// Serialize a frame and send it
    pub fn send_json<T: Serialize>(&self, frame: &T) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.send_text(&text),
            Err(e) => {
                log::error!("Failed to serialize frame for user {}: {}", self.user_id, e);
                false
            }
        }
    }

    /// Ask the writer to close the socket
    pub fn close(&self, code: u16, reason: &'static str) -> bool {
        self.sender.send(Message::close_with(code, reason)).is_ok()
    }

    /// Whether the socket writer is still alive
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
