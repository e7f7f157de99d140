//! Rusty Relay - real-time chat delivery over WebSockets
//!
//! Authenticated clients keep one WebSocket open per user. Direct and group
//! messages are persisted, fanned out to every relay instance through a
//! publish/subscribe broker and pushed by whichever instance holds the
//! recipient's connection. Users who were away get their backlog on connect.

pub mod auth;
pub mod broker;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
