//! Client protocol frames
//!
//! Inbound frames are decoded in two steps: the `type` discriminator first,
//! then the body. That lets an unknown type and a malformed body produce
//! different `error` frames while the connection stays open.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::broker::events::{DirectMessageEvent, GroupMessageEvent};
use crate::error::{Result, RustyRelayError, ValidationKind};
use crate::storage::DeliveryStatus;

/// Client-to-server frames
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Send a direct message
    Message(DirectMessageFrame),
    /// Mark a direct message as read
    Read(ReadFrame),
    /// Send a message to a group
    GroupMessage(GroupMessageFrame),
    /// Advance the read cursor in a group
    GroupRead(GroupReadFrame),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectMessageFrame {
    #[serde(deserialize_with = "deserialize_id")]
    pub recipient_id: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadFrame {
    #[serde(deserialize_with = "deserialize_id")]
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupMessageFrame {
    #[serde(deserialize_with = "deserialize_id")]
    pub group_id: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupReadFrame {
    #[serde(deserialize_with = "deserialize_id")]
    pub group_id: i64,
    #[serde(deserialize_with = "deserialize_id")]
    pub message_id: i64,
}

/// Ids may arrive as JSON numbers or numeric strings
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom("id is not an integer")),
    }
}

impl ClientFrame {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| RustyRelayError::MessageParseError("frame is not an object".to_string()))?;

        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(invalid("type")),
            None => return Err(missing("type")),
        };

        match kind.as_str() {
            "message" => Ok(Self::Message(body(&value, &["recipient_id"])?)),
            "read" => Ok(Self::Read(body(&value, &["message_id"])?)),
            "group_message" => Ok(Self::GroupMessage(body(&value, &["group_id"])?)),
            "group_read" => Ok(Self::GroupRead(body(&value, &["group_id", "message_id"])?)),
            other => Err(RustyRelayError::UnknownFrameType(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Read(_) => "read",
            Self::GroupMessage(_) => "group_message",
            Self::GroupRead(_) => "group_read",
        }
    }
}

fn missing(field: &str) -> RustyRelayError {
    RustyRelayError::ValidationError(ValidationKind::MissingField(field.to_string()))
}

fn invalid(field: &str) -> RustyRelayError {
    RustyRelayError::ValidationError(ValidationKind::InvalidField(field.to_string()))
}

/// Decode a frame body, reporting which required field is missing or invalid
fn body<T: for<'de> Deserialize<'de>>(value: &Value, required: &[&str]) -> Result<T> {
    for field in required {
        match value.get(*field) {
            None | Some(Value::Null) => return Err(missing(field)),
            Some(_) => {}
        }
    }
    serde_json::from_value(value.clone()).map_err(|e| {
        let field = required
            .iter()
            .find(|f| e.to_string().contains(*f))
            .copied()
            .unwrap_or("body");
        log::debug!("Invalid frame body: {}", e);
        invalid(field)
    })
}

/// Text and attachment of an outgoing message after normalisation.
/// A blank body counts as absent.
pub fn normalize_payload(
    message: Option<String>,
    image_url: Option<String>,
) -> Result<(Option<String>, Option<String>)> {
    let message = message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    let image_url = image_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    if message.is_none() && image_url.is_none() {
        return Err(RustyRelayError::ValidationError(ValidationKind::EmptyMessage));
    }
    Ok((message, image_url))
}

/// Status reported in acknowledgements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Pending,
    Delivered,
    /// Group messages have no per-recipient status
    Sent,
}

impl From<DeliveryStatus> for AckStatus {
    fn from(status: DeliveryStatus) -> Self {
        match status {
            DeliveryStatus::Pending => AckStatus::Pending,
            DeliveryStatus::Delivered | DeliveryStatus::Read => AckStatus::Delivered,
        }
    }
}

/// Server-to-client frames produced directly by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Direct message for the recipient (backlog replay)
    Message(DirectMessageEvent),
    /// Group message for a member (backlog replay)
    GroupMessage(GroupMessageEvent),
    /// Acknowledgement to the sender
    Ack { message_id: i64, status: AckStatus },
    /// Error for the frame just processed
    Error { reason: String },
}

impl ServerFrame {
    pub fn error(err: &RustyRelayError) -> Self {
        ServerFrame::Error {
            reason: err.error_reason().to_string(),
        }
    }
}
