//! Broker frame types for the pawchat subscribe/publish protocol.
//!
//! Every WebSocket text frame carries one JSON-encoded [`ClientFrame`] or
//! [`ServerFrame`], tagged by a `type` field. Clients subscribe once to their
//! per-user inbox destination and publish outbound messages to the shared
//! send destination; the broker pushes [`ServerFrame::Message`] frames to the
//! relevant inboxes.

use serde::{Deserialize, Serialize};

/// Destination clients publish outbound messages to.
pub const SEND_DESTINATION: &str = "/app/chat.send";

/// Prefix of per-user inbox destinations.
pub const INBOX_PREFIX: &str = "/queue/chat.";

/// Builds the inbox destination for a user id, e.g. `/queue/chat.u42`.
#[must_use]
pub fn inbox_destination(user_id: &str) -> String {
    format!("{INBOX_PREFIX}{user_id}")
}

/// Extracts the user id from an inbox destination, if it is one.
#[must_use]
pub fn inbox_user(destination: &str) -> Option<&str> {
    destination
        .strip_prefix(INBOX_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Frames sent from a client to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a destination (at most one inbox per session).
    Subscribe {
        /// The inbox destination, `/queue/chat.<userId>`.
        destination: String,
    },
    /// Unsubscribe from a previously subscribed destination.
    Unsubscribe {
        /// The destination to drop.
        destination: String,
    },
    /// Publish a message body to a destination.
    Send {
        /// The publish destination, `/app/chat.send`.
        destination: String,
        /// The JSON message body (an `OutgoingMessage`).
        body: serde_json::Value,
    },
    /// Client heartbeat.
    Ping,
}

/// Frames sent from the broker to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledges a subscription.
    Subscribed {
        /// The destination that was subscribed.
        destination: String,
    },
    /// A message delivered to a subscribed inbox.
    Message {
        /// The inbox destination this was delivered on.
        destination: String,
        /// The raw JSON message record (normalized by the client).
        body: serde_json::Value,
    },
    /// A protocol or authorization error.
    Error {
        /// Human-readable reason. Reasons containing "unauthorized" or
        /// "forbidden" signal an auth rejection to the client.
        reason: String,
    },
    /// Broker heartbeat reply.
    Pong,
}

impl ServerFrame {
    /// Whether this frame reports an authorization failure.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        match self {
            Self::Error { reason } => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("unauthorized") || reason.contains("forbidden")
            }
            _ => false,
        }
    }
}
