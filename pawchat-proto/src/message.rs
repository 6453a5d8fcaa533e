//! Canonical message types for the pawchat support channel.
//!
//! [`ChatMessage`] is the single record shape the rest of the system works
//! with; every inbound payload (live frame or history row) is converted to it
//! by [`crate::normalize`] before anything else looks at it. On the wire all
//! fields are camelCase JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of synthetic identifiers assigned to optimistic (not yet
/// server-confirmed) messages.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// A canonical chat message between a buyer and a support agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Durable server-assigned identifier, or a `temp-<millis>-<random>`
    /// value while the message is pending. The dedupe key.
    pub id: String,
    /// Opaque stable identifier of the sender.
    pub sender_id: String,
    /// Opaque stable identifier of the receiver.
    pub receiver_id: String,
    /// Display-only sender label; best-effort, may be empty.
    #[serde(default)]
    pub sender_username: String,
    /// Display-only receiver label; best-effort, may be empty.
    #[serde(default)]
    pub receiver_username: String,
    /// Trimmed text body.
    pub content: String,
    /// ISO-8601 creation timestamp; the sole sort key.
    pub created_at: String,
    /// Client-generated correlation nonce carried through the publish
    /// payload and echoed back by the broker. Lets the receiver reconcile a
    /// server echo with the optimistic entry it replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl ChatMessage {
    /// Whether this message still carries a synthetic temp id.
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Whether this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    #[must_use]
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// Milliseconds since the UNIX epoch parsed from `created_at`.
    ///
    /// Accepts RFC 3339 strings and bare epoch-millisecond integers (some
    /// legacy history rows carry the latter). Unparseable values sort first,
    /// which keeps them visible rather than silently dropped.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        DateTime::parse_from_rfc3339(&self.created_at).map_or_else(
            |_| self.created_at.parse::<i64>().unwrap_or(i64::MIN),
            |dt| dt.timestamp_millis(),
        )
    }
}

/// Body of an outbound send, both for the realtime publish and the REST
/// fallback: `{senderId, receiverId, content, clientRef}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Sender identifier.
    pub sender_id: String,
    /// Receiver identifier.
    pub receiver_id: String,
    /// Trimmed text body.
    pub content: String,
    /// Correlation nonce (the optimistic temp id), echoed by the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

/// Error returned when an outbound message fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty after trimming.
    #[error("message content is empty")]
    EmptyContent,
    /// Sender or receiver identifier is missing.
    #[error("missing participant identifier")]
    MissingParticipant,
}

impl OutgoingMessage {
    /// Validates this message for sending: both participant ids present and
    /// non-empty trimmed content.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingParticipant`] if either id is empty,
    /// or [`ValidationError::EmptyContent`] for whitespace-only content.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sender_id.is_empty() || self.receiver_id.is_empty() {
            return Err(ValidationError::MissingParticipant);
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        Ok(())
    }
}

/// Generates a synthetic `temp-<millis>-<random>` identifier for an
/// optimistic message.
#[must_use]
pub fn temp_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let nonce = Uuid::new_v4().simple().to_string();
    // Eight hex chars of randomness is plenty within one conversation.
    format!("{TEMP_ID_PREFIX}{millis}-{}", &nonce[..8])
}

/// Current time as an ISO-8601 / RFC 3339 string (millisecond precision,
/// UTC), the canonical `created_at` format.
#[must_use]
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
