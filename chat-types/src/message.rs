//! The chat message value and its dedup identity.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::InvalidMessage;

/// A transport-supplied unique message identifier.
///
/// The backend may send ids as JSON strings or integers; both normalize
/// to the string form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a MessageId from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// The attributes that decide whether two messages are the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Transport-supplied id.
    Id(MessageId),
    /// Fallback identity when no id is available.
    Tuple {
        /// Sender username.
        sender: String,
        /// Message text.
        content: String,
        /// Source-assigned time.
        timestamp: DateTime<Utc>,
    },
}

/// A single chat message.
///
/// Immutable once received; the store never edits or removes one.
/// Deserializing goes through [`ChatMessage::from_value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct ChatMessage {
    /// Transport-supplied id, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Username of the author.
    pub sender: String,
    /// Message text.
    pub content: String,
    /// Time assigned by the source.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message without a transport id.
    pub fn new(
        sender: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            content: content.into(),
            timestamp,
        }
    }

    /// Attach a transport id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(MessageId::new(id));
        self
    }

    /// Decode a message from a JSON payload.
    ///
    /// `sender`, `content` and `timestamp` are required; `id` is optional and
    /// silently ignored when it has an unusable type.
    pub fn from_value(value: &Value) -> Result<Self, InvalidMessage> {
        let obj = value.as_object().ok_or(InvalidMessage::NotAnObject)?;

        let sender = required_str(obj, "sender")?;
        let content = required_str(obj, "content")?;
        let raw_timestamp = obj
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or(InvalidMessage::MissingField("timestamp"))?;
        let timestamp = parse_timestamp(raw_timestamp)?;
        let id = obj.get("id").and_then(MessageId::from_value);

        let message = Self {
            id,
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp,
        };
        message.validate()?;
        Ok(message)
    }

    /// Check the non-empty invariants on `sender` and `content`.
    pub fn validate(&self) -> Result<(), InvalidMessage> {
        if self.sender.trim().is_empty() {
            return Err(InvalidMessage::EmptyField("sender"));
        }
        if self.content.trim().is_empty() {
            return Err(InvalidMessage::EmptyField("content"));
        }
        Ok(())
    }

    /// The preferred dedup identity: the id if present, else the tuple.
    pub fn dedup_key(&self) -> DedupKey {
        match &self.id {
            Some(id) => DedupKey::Id(id.clone()),
            None => self.tuple_key(),
        }
    }

    /// The `(sender, content, timestamp)` identity, regardless of id.
    pub fn tuple_key(&self) -> DedupKey {
        DedupKey::Tuple {
            sender: self.sender.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl TryFrom<Value> for ChatMessage {
    type Error = InvalidMessage;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

fn required_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, InvalidMessage> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or(InvalidMessage::MissingField(field))
}

/// Parse an ISO-8601 timestamp.
///
/// RFC 3339 strings keep their offset. Offset-less date-times (as emitted
/// for unspecified-kind server clocks) are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, InvalidMessage> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| InvalidMessage::InvalidTimestamp(raw.to_string()))
}
