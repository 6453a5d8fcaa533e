//! In-memory persistence for chat messages.
//!
//! The [`ChatStore`] assigns durable ids and timestamps to accepted messages
//! and serves per-pair conversation history. Data lives for the lifetime of
//! the process; a database-backed store is a deployment concern, not a
//! protocol one.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use pawchat_proto::message::{ChatMessage, OutgoingMessage, now_iso8601};

/// Default maximum number of history rows returned per conversation.
const DEFAULT_HISTORY_LIMIT: usize = 200;

/// In-memory append-only message store.
///
/// Thread-safe via [`RwLock`]. Ids are a monotonically increasing sequence,
/// rendered as decimal strings on the wire.
pub struct ChatStore {
    messages: RwLock<Vec<ChatMessage>>,
    next_id: AtomicU64,
    history_limit: usize,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Creates a new, empty store with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Creates a new, empty store with a custom per-conversation history
    /// limit.
    #[must_use]
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            history_limit,
        }
    }

    /// Persists an outbound message, assigning a durable id and creation
    /// timestamp. The client's `client_ref` nonce is echoed unchanged so the
    /// sender can reconcile its optimistic entry.
    pub async fn append(&self, out: &OutgoingMessage) -> ChatMessage {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = ChatMessage {
            id: id.to_string(),
            sender_id: out.sender_id.clone(),
            receiver_id: out.receiver_id.clone(),
            sender_username: String::new(),
            receiver_username: String::new(),
            content: out.content.trim().to_string(),
            created_at: now_iso8601(),
            client_ref: out.client_ref.clone(),
        };
        self.messages.write().await.push(message.clone());
        message
    }

    /// Returns the conversation between `a` and `b`, oldest first, capped at
    /// the configured history limit (most recent rows win).
    pub async fn history(&self, a: &str, b: &str) -> Vec<ChatMessage> {
        let messages = self.messages.read().await;
        let mut rows: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.involves(a, b))
            .cloned()
            .collect();
        drop(messages);

        rows.sort_by_key(ChatMessage::timestamp_ms);
        if rows.len() > self.history_limit {
            rows.drain(..rows.len() - self.history_limit);
        }
        rows
    }
}
