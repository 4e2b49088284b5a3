use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::ChatMessage;

/// Frames sent FROM client TO server over the realtime channel.
///
/// Fields are optional so that a frame with a known `type` but missing data
/// still parses and can be answered with an `error` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RealtimeCommand {
    /// Send a chat message to another user
    Chat {
        #[serde(default, deserialize_with = "lenient_id")]
        receiver_id: Option<i64>,
        content_type: Option<i32>,
        content: Option<String>,
        extra: Option<serde_json::Value>,
    },

    /// Mark every message of a session addressed to the caller as read
    Read {
        #[serde(default, deserialize_with = "lenient_id")]
        session_id: Option<i64>,
    },

    /// Application-level keepalive
    Ping,

    /// Any `type` this server does not understand
    #[serde(other)]
    Unknown,
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A message addressed to this user
    Chat { message: ChatMessage },

    /// The sender's own message, as persisted
    ChatAck { message: ChatMessage },

    /// Confirms a `read` frame
    ReadAck { message: ReadReceipt },

    Pong,

    Error { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub session_id: i64,
    pub sender_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Ids arrive as JSON numbers, but numeric strings such as `"42"` are
/// accepted too.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("id out of range: {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid id: {:?}", s))),
        Some(other) => Err(D::Error::custom(format!("invalid id: {}", other))),
    }
}

/// Flattens the opaque `extra` payload into the string stored with a message.
pub fn extra_to_string(extra: Option<serde_json::Value>) -> Option<String> {
    match extra? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
