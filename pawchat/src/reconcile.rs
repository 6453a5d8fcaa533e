//! Delivery reconciliation for one active conversation.
//!
//! The [`Reconciler`] owns the visible message list and enforces its
//! invariants: every message appears exactly once (first write wins),
//! ordering is by timestamp with arrival order breaking ties, and an
//! optimistic entry is replaced in place once the broker echo carrying its
//! `client_ref` arrives.
//!
//! Sends are optimistic: the message is inserted with a temp id before the
//! socket publish. When the publish is refused and the session is
//! disconnected, the send falls back to the REST endpoint; if that also
//! fails the optimistic entry stays visible, unconfirmed.
//!
//! All state lives behind a short-lived [`parking_lot::Mutex`], never held
//! across an await.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde_json::Value;

use pawchat_proto::message::{
    ChatMessage, OutgoingMessage, ValidationError, now_iso8601, temp_id,
};
use pawchat_proto::normalize::normalize;

use crate::rest::{ChatBackend, RestError};
use crate::session::Session;

/// Synchronous, best-effort socket publish. The seam between the reconciler
/// and the transport session.
pub trait Publisher {
    /// Hands a message to the live socket; `true` means accepted for
    /// transmission, not delivered.
    fn publish(&self, out: &OutgoingMessage) -> bool;

    /// Whether the underlying connection is live.
    fn is_connected(&self) -> bool;
}

impl Publisher for Session {
    fn publish(&self, out: &OutgoingMessage) -> bool {
        Self::publish(self, out)
    }

    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }
}

impl<T: Publisher> Publisher for std::sync::Arc<T> {
    fn publish(&self, out: &OutgoingMessage) -> bool {
        self.as_ref().publish(out)
    }

    fn is_connected(&self) -> bool {
        self.as_ref().is_connected()
    }
}

/// Errors from [`Reconciler::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No conversation partner is selected.
    #[error("no active conversation")]
    NoPartner,

    /// The previous send has not been acknowledged yet.
    #[error("a send is already in flight")]
    InFlight,

    /// The message failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The socket refused the publish while reporting itself connected. The
    /// optimistic entry stays visible, unconfirmed.
    #[error("socket publish failed")]
    Publish,

    /// The REST fallback failed. The optimistic entry stays visible,
    /// unconfirmed; no automatic retry is performed.
    #[error("fallback send failed: {0}")]
    Fallback(#[from] RestError),
}

struct State {
    partner_id: Option<String>,
    /// Bumped on every partner switch; async work captured under an older
    /// generation discards its result.
    generation: u64,
    messages: Vec<ChatMessage>,
    seen_ids: HashSet<String>,
    /// Temp id of the one unacknowledged optimistic send, if any.
    in_flight: Option<String>,
}

/// Per-user reconciler combining the socket publisher and the REST backend.
pub struct Reconciler<P, B> {
    self_id: String,
    publisher: P,
    backend: B,
    inner: Mutex<State>,
}

impl<P: Publisher, B: ChatBackend> Reconciler<P, B> {
    /// Creates a reconciler for the given local user.
    pub fn new(self_id: impl Into<String>, publisher: P, backend: B) -> Self {
        Self {
            self_id: self_id.into(),
            publisher,
            backend,
            inner: Mutex::new(State {
                partner_id: None,
                generation: 0,
                messages: Vec::new(),
                seen_ids: HashSet::new(),
                in_flight: None,
            }),
        }
    }

    /// Switches the active conversation and loads its history.
    ///
    /// Clears the visible list immediately, then seeds it from the REST
    /// history once the fetch lands. A history failure degrades to an empty
    /// conversation rather than an error. If the partner changes again while
    /// the fetch is in the air, the stale result is discarded.
    pub async fn select_partner(&self, partner_id: &str) -> Vec<ChatMessage> {
        let generation = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.partner_id = Some(partner_id.to_string());
            state.messages.clear();
            state.seen_ids.clear();
            state.in_flight = None;
            state.generation
        };

        let rows = match self.backend.history(partner_id).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(partner_id = %partner_id, error = %e, "history load failed, starting empty");
                Vec::new()
            }
        };

        let mut state = self.inner.lock();
        if state.generation != generation {
            tracing::debug!(partner_id = %partner_id, "discarding stale history result");
            return state.messages.clone();
        }
        for row in rows {
            if state.seen_ids.insert(row.id.clone()) {
                state.messages.push(row);
            }
        }
        state.messages.sort_by_key(ChatMessage::timestamp_ms);
        state.messages.clone()
    }

    /// Applies one inbound socket payload to the conversation.
    ///
    /// Returns `true` if the visible list changed. Unusable payloads and
    /// messages for other conversations are ignored; duplicates are dropped
    /// (the first accepted copy wins).
    pub fn on_inbound(&self, raw: &Value) -> bool {
        let Some(message) = normalize(raw) else {
            tracing::warn!("unusable inbound payload, skipping");
            return false;
        };

        let mut state = self.inner.lock();
        let Some(partner_id) = state.partner_id.clone() else {
            tracing::debug!(id = %message.id, "no active conversation, ignoring inbound");
            return false;
        };
        if !message.involves(&self.self_id, &partner_id) {
            tracing::debug!(
                id = %message.id,
                from = %message.sender_id,
                "inbound message outside active conversation, ignoring"
            );
            return false;
        }

        // Echo resolution: an inbound copy carrying our client_ref replaces
        // the optimistic entry in place.
        if let Some(client_ref) = message.client_ref.clone()
            && let Some(index) = state.messages.iter().position(|m| m.id == client_ref)
        {
            state.seen_ids.remove(&client_ref);
            if !state.seen_ids.insert(message.id.clone()) {
                // Authoritative copy already arrived separately; drop the temp.
                state.messages.remove(index);
                state.in_flight.take_if(|id| *id == client_ref);
                return true;
            }
            state.messages[index] = message;
            state.in_flight.take_if(|id| *id == client_ref);
            state.messages.sort_by_key(ChatMessage::timestamp_ms);
            return true;
        }

        if !state.seen_ids.insert(message.id.clone()) {
            tracing::debug!(id = %message.id, "duplicate message dropped");
            return false;
        }
        state.messages.push(message);
        state.messages.sort_by_key(ChatMessage::timestamp_ms);
        true
    }

    /// Sends a message to the active partner.
    ///
    /// Inserts an optimistic temp entry, then tries the socket. If the
    /// socket refuses while disconnected, the REST fallback takes over; its
    /// stored record replaces the temp entry directly. Only one send may be
    /// in flight at a time. A failed send never removes the optimistic
    /// entry: it stays visible, unconfirmed, with no automatic retry.
    ///
    /// # Errors
    ///
    /// [`SendError::NoPartner`] without an active conversation,
    /// [`SendError::InFlight`] while a send is unacknowledged,
    /// [`SendError::Invalid`] for unusable content (all three leave state
    /// untouched), [`SendError::Publish`] when a live socket refuses the
    /// frame, and [`SendError::Fallback`] when the REST fallback fails.
    pub async fn send(&self, content: &str) -> Result<ChatMessage, SendError> {
        let (out, temp, generation) = {
            let mut state = self.inner.lock();
            let partner_id = state.partner_id.clone().ok_or(SendError::NoPartner)?;
            if state.in_flight.is_some() {
                return Err(SendError::InFlight);
            }

            let temp_ref = temp_id();
            let out = OutgoingMessage {
                sender_id: self.self_id.clone(),
                receiver_id: partner_id.clone(),
                content: content.trim().to_string(),
                client_ref: Some(temp_ref.clone()),
            };
            out.validate()?;

            let temp = ChatMessage {
                id: temp_ref.clone(),
                sender_id: self.self_id.clone(),
                receiver_id: partner_id,
                sender_username: String::new(),
                receiver_username: String::new(),
                content: out.content.clone(),
                created_at: now_iso8601(),
                client_ref: Some(temp_ref.clone()),
            };
            state.seen_ids.insert(temp.id.clone());
            state.messages.push(temp.clone());
            state.messages.sort_by_key(ChatMessage::timestamp_ms);
            state.in_flight = Some(temp_ref);
            (out, temp, state.generation)
        };

        if self.publisher.publish(&out) {
            // The broker echo will replace the temp entry.
            return Ok(temp);
        }

        if self.publisher.is_connected() {
            // A live socket refused the frame; do not double-send over REST.
            self.mark_unconfirmed(&temp.id, generation);
            return Err(SendError::Publish);
        }

        tracing::info!(id = %temp.id, "socket down, sending over REST");
        match self.backend.send(&out).await {
            Ok(stored) => {
                let mut state = self.inner.lock();
                if state.generation == generation
                    && let Some(index) = state.messages.iter().position(|m| m.id == temp.id)
                {
                    state.seen_ids.remove(&temp.id);
                    state.seen_ids.insert(stored.id.clone());
                    state.messages[index] = stored.clone();
                    state.messages.sort_by_key(ChatMessage::timestamp_ms);
                    state.in_flight = None;
                }
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!(id = %temp.id, error = %e, "fallback send failed, entry stays unconfirmed");
                self.mark_unconfirmed(&temp.id, generation);
                Err(SendError::Fallback(e))
            }
        }
    }

    /// Reacts to the transport leaving the connected state.
    ///
    /// A publish the socket accepted is only confirmed by the broker echo,
    /// and a dropped connection never redelivers that echo. Freeing the
    /// in-flight slot keeps the conversation sendable; the optimistic entry
    /// stays visible, unconfirmed.
    pub fn on_disconnect(&self) {
        let mut state = self.inner.lock();
        if let Some(id) = state.in_flight.take() {
            tracing::info!(id = %id, "connection lost with a send in flight, entry stays unconfirmed");
        }
    }

    /// Clears the in-flight marker after a failed send. The optimistic entry
    /// is kept: the user sees their message unconfirmed rather than deleted.
    fn mark_unconfirmed(&self, temp_ref: &str, generation: u64) {
        let mut state = self.inner.lock();
        if state.generation != generation {
            return;
        }
        state.in_flight.take_if(|id| id.as_str() == temp_ref);
    }

    /// Snapshot of the visible conversation, ordered for display.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    /// The active conversation partner, if any.
    pub fn partner(&self) -> Option<String> {
        self.inner.lock().partner_id.clone()
    }

    /// Whether an optimistic send is still unacknowledged.
    pub fn has_in_flight(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }
}
