//! Durable store interfaces and the in-memory backend

pub mod memory;
pub mod traits;

// Re-export the storage interfaces
pub use memory::MemoryStorage;
pub use traits::{
    ChatStorage, DeliveryStatus, GroupMembership, GroupRole, GroupStorage, MessageStorage,
    NewGroupMessage, NewMessage, NewUser, PresenceStatus, StoredGroup, StoredGroupMessage,
    StoredMessage, StoredUser, UserStorage,
};
