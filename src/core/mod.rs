//! Core of the relay: connections, delivery, presence and fanout

pub mod connection;
pub mod delivery;
pub mod message_types;
pub mod presence;
pub mod rate_limiter;
pub mod registry;
pub mod server;
pub mod subscriber;

// Re-export main components for convenience
pub use connection::Connection;
pub use delivery::{BacklogReport, DeliveryEngine};
pub use message_types::{AckStatus, ClientFrame, ServerFrame};
pub use presence::PresenceTracker;
pub use rate_limiter::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};
pub use registry::{ConnectionRegistry, SharedRegistry};
pub use server::{ChatServer, SharedChatServer};
pub use subscriber::{EventDispatcher, SubscriberHandle};
