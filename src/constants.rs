// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
pub const WS_PATH: &str = "ws";
pub const WS_CHAT_PATH: &str = "chat";

// Broker channels
pub const CHAT_CHANNEL: &str = "chat_messages";
pub const PRESENCE_CHANNEL: &str = "presence";
pub const READ_CHANNEL: &str = "read_receipt";
pub const GROUP_CHANNEL_PREFIX: &str = "group:";
pub const GROUP_CHANNEL_PATTERN: &str = "group:*";

// Rate limiting
pub const SEND_MESSAGE_ACTION: &str = "send_message";
pub const SEND_GROUP_MESSAGE_ACTION: &str = "send_group_message";
pub const DEFAULT_MESSAGE_RATE_LIMIT: u64 = 20;
pub const DEFAULT_GROUP_MESSAGE_RATE_LIMIT: u64 = 30;
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

// Token lifetimes
pub const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 30;
pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 7;
pub const MAX_TOKEN_LENGTH: usize = 4096;

// Uploaded attachments
pub const DEFAULT_MEDIA_DIR: &str = "media";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
pub const MEDIA_PATH: &str = "media";

// WebSocket close codes
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_NORMAL: u16 = 1000;

/// Capacity of the in-process broadcast channel used by the memory broker
pub const MEMORY_BROKER_CAPACITY: usize = 1024;

/// Name of the broker channel carrying events for one group
pub fn group_channel(group_id: i64) -> String {
    format!("{}{}", GROUP_CHANNEL_PREFIX, group_id)
}
