use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum RustyRelayError {
    // Connection errors
    ConnectionError(String),
    ConnectionClosed,

    // Storage errors
    StorageError(String),
    NotFound(String),
    Conflict(String),

    // Broker errors
    BrokerError(String),

    // Frame errors
    MessageParseError(String),
    UnknownFrameType(String),

    // Auth errors
    AuthError(String),
    NotAMember { group_id: i64 },
    CannotReadOwnMessage,

    // Validation errors
    ValidationError(ValidationKind),

    // Rate limiting
    RateLimited(String),

    // Configuration errors
    ConfigError(String),
}

/// Client-correctable problems with a frame's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    EmptyMessage,
    MissingField(String),
    InvalidField(String),
    UnknownRecipient,
    UnsupportedMediaType,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "message has neither text nor attachment"),
            Self::MissingField(field) => write!(f, "missing field '{}'", field),
            Self::InvalidField(field) => write!(f, "invalid value for field '{}'", field),
            Self::UnknownRecipient => write!(f, "recipient does not exist"),
            Self::UnsupportedMediaType => write!(f, "only JPEG and PNG images are accepted"),
        }
    }
}

impl fmt::Display for RustyRelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::ConnectionClosed => write!(f, "Connection closed unexpectedly"),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::Conflict(what) => write!(f, "Conflict: {}", what),
            Self::BrokerError(msg) => write!(f, "Broker error: {}", msg),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::UnknownFrameType(kind) => write!(f, "Unknown frame type: {}", kind),
            Self::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            Self::NotAMember { group_id } => write!(f, "Not a member of group {}", group_id),
            Self::CannotReadOwnMessage => write!(f, "Authors cannot mark their own messages as read"),
            Self::ValidationError(kind) => write!(f, "Validation error: {}", kind),
            Self::RateLimited(action) => write!(f, "Rate limit exceeded for {}", action),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RustyRelayError {}

impl RustyRelayError {
    /// Stable reason string sent to clients in `error` frames
    pub fn error_reason(&self) -> &'static str {
        match self {
            Self::MessageParseError(_) => "invalid_json",
            Self::UnknownFrameType(_) => "unknown_type",
            Self::ValidationError(ValidationKind::EmptyMessage) => "empty_message",
            Self::ValidationError(ValidationKind::MissingField(_)) => "missing_field",
            Self::ValidationError(ValidationKind::InvalidField(_)) => "invalid_field",
            Self::ValidationError(ValidationKind::UnknownRecipient) => "unknown_recipient",
            Self::ValidationError(ValidationKind::UnsupportedMediaType) => "unsupported_media_type",
            Self::RateLimited(_) => "rate_limited",
            Self::NotAMember { .. } => "not_a_member",
            Self::CannotReadOwnMessage => "cannot_read_own_message",
            Self::AuthError(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            _ => "internal_error",
        }
    }

    /// Whether the error should be reported back to the client as an `error` frame
    pub fn is_client_facing(&self) -> bool {
        !matches!(self, Self::StorageError(_) | Self::BrokerError(_) | Self::ConnectionError(_) | Self::ConnectionClosed | Self::ConfigError(_))
    }
}

impl From<redis::RedisError> for RustyRelayError {
    fn from(err: redis::RedisError) -> Self {
        RustyRelayError::BrokerError(err.to_string())
    }
}

impl From<std::io::Error> for RustyRelayError {
    fn from(err: std::io::Error) -> Self {
        RustyRelayError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for RustyRelayError {
    fn from(err: serde_json::Error) -> Self {
        RustyRelayError::MessageParseError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for RustyRelayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        RustyRelayError::AuthError(format!("Invalid token: {}", err))
    }
}

// Generic result type for RustyRelay
pub type Result<T> = std::result::Result<T, RustyRelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reasons_are_stable() {
        assert_eq!(
            RustyRelayError::UnknownFrameType("ping".to_string()).error_reason(),
            "unknown_type"
        );
        assert_eq!(
            RustyRelayError::ValidationError(ValidationKind::EmptyMessage).error_reason(),
            "empty_message"
        );
        assert_eq!(RustyRelayError::NotAMember { group_id: 3 }.error_reason(), "not_a_member");
        assert_eq!(RustyRelayError::StorageError("down".into()).error_reason(), "internal_error");
    }

    #[test]
    fn test_internal_errors_are_not_client_facing() {
        assert!(!RustyRelayError::BrokerError("gone".into()).is_client_facing());
        assert!(RustyRelayError::RateLimited("send_message".into()).is_client_facing());
    }
}
