use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::RoomId;

/// A chat message as stored and replayed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    /// Free-form sender tag, e.g. `doctor` or `patient`
    pub sender: String,
    /// Server-observed receipt time
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

/// Client's view of a message before the relay accepts it.
///
/// The timestamp is advisory; the relay replaces it with its own clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub content: String,
    pub sender: String,
    /// Unparseable values read as `None` rather than failing the event.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "advisory_timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageDraft {
    pub fn new(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            timestamp: Some(Utc::now()),
        }
    }

    /// Canonicalize into a stored message stamped at `received_at`.
    pub fn accept(self, received_at: DateTime<Utc>) -> Message {
        Message {
            content: self.content,
            sender: self.sender,
            timestamp: received_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub room_id: RoomId,
    pub message: MessageDraft,
}

/// Events sent from a chat client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Subscribe to a room and request its history
    JoinRoom(RoomId),
    /// Append to a room and broadcast
    SendMessage(SendMessage),
}

/// Events sent from the relay to a chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full ordered history, once per join, to the joiner only
    ChatHistory(Vec<Message>),
    /// A newly accepted message, to every subscriber of the room
    ReceiveMessage(Message),
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Best-effort read of a client clock: RFC 3339, or a naive ISO-8601
/// date-time taken as UTC. Anything else, including non-strings, is `None`.
fn advisory_timestamp<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(d)?;
    let Some(raw) = raw.as_str() else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    Ok(raw
        .parse::<NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc()))
}

/// RFC 3339 with millisecond precision and a `Z` suffix, the shape
/// browsers produce for `toISOString()`.
mod iso8601 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
