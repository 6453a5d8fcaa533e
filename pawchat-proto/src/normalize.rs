//! Shape-tolerant normalization of raw message payloads.
//!
//! Inbound payloads arrive in several historical shapes: live broker frames,
//! persisted history rows, and legacy rows with misspelled keys (`reciverId`)
//! or participants embedded as `{id, username}` objects. [`normalize`] maps
//! any of them onto the canonical [`ChatMessage`].
//!
//! The accepted source keys per canonical field are explicit tables evaluated
//! in fixed priority order, so the tolerance is auditable in one place
//! instead of scattered through lookup chains.

use serde_json::{Map, Value};

use crate::message::{ChatMessage, now_iso8601, temp_id};

/// Source keys for the message id, in priority order.
const ID_KEYS: &[&str] = &["id", "messageId", "_id"];

/// Source keys for the sender; values may be a scalar id or an
/// `{id, username}` object.
const SENDER_KEYS: &[&str] = &["senderId", "sender", "from"];

/// Source keys for the receiver, including the legacy misspelling.
const RECEIVER_KEYS: &[&str] = &["receiverId", "reciverId", "receiver", "to"];

/// Source keys for the sender display name.
const SENDER_USERNAME_KEYS: &[&str] = &["senderUsername", "senderName"];

/// Source keys for the receiver display name, including the legacy
/// misspelling.
const RECEIVER_USERNAME_KEYS: &[&str] = &["receiverUsername", "reciverUsername", "receiverName"];

/// Source keys for the text body.
const CONTENT_KEYS: &[&str] = &["content", "text", "message"];

/// Source keys for the creation timestamp.
const CREATED_AT_KEYS: &[&str] = &["createdAt", "created_at", "timestamp", "sentAt"];

/// Source keys for the client correlation nonce.
const CLIENT_REF_KEYS: &[&str] = &["clientRef", "client_ref"];

/// Converts an arbitrary raw payload into the canonical [`ChatMessage`].
///
/// Total over any [`Value`]: never panics. Returns `None` for `null`,
/// non-object, or empty-object input. A missing id is filled with a synthetic
/// temp id and a missing timestamp with the current time, so the result is
/// always displayable. Normalizing an already-canonical message returns an
/// equal message.
#[must_use]
pub fn normalize(raw: &Value) -> Option<ChatMessage> {
    let obj = raw.as_object()?;
    if obj.is_empty() {
        return None;
    }

    let (sender_id, sender_embedded_name) = participant(obj, SENDER_KEYS);
    let (receiver_id, receiver_embedded_name) = participant(obj, RECEIVER_KEYS);

    let sender_username = first_string(obj, SENDER_USERNAME_KEYS).unwrap_or(sender_embedded_name);
    let receiver_username =
        first_string(obj, RECEIVER_USERNAME_KEYS).unwrap_or(receiver_embedded_name);

    Some(ChatMessage {
        id: first_string(obj, ID_KEYS).unwrap_or_else(temp_id),
        sender_id,
        receiver_id,
        sender_username,
        receiver_username,
        content: first_string(obj, CONTENT_KEYS)
            .unwrap_or_default()
            .trim()
            .to_string(),
        created_at: first_string(obj, CREATED_AT_KEYS).unwrap_or_else(now_iso8601),
        client_ref: first_string(obj, CLIENT_REF_KEYS),
    })
}

/// Returns the first present key's value coerced to a string.
fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(scalar_string))
}

/// Coerces a scalar JSON value to a string; `None` for null, objects,
/// arrays, and booleans.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolves a participant field that may be a scalar id or a nested
/// `{id, username}` object. Returns `(id, embedded_username)`, both possibly
/// empty.
fn participant(obj: &Map<String, Value>, keys: &[&str]) -> (String, String) {
    for key in keys {
        match obj.get(*key) {
            Some(Value::Object(nested)) => {
                let id = nested.get("id").and_then(scalar_string).unwrap_or_default();
                let username = nested
                    .get("username")
                    .and_then(scalar_string)
                    .unwrap_or_default();
                return (id, username);
            }
            Some(scalar) => {
                if let Some(id) = scalar_string(scalar) {
                    return (id, String::new());
                }
            }
            None => {}
        }
    }
    (String::new(), String::new())
}
