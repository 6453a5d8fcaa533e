//! REST client for conversation history and the HTTP send fallback.
//!
//! The storefront API wraps payloads in a `{"data": …}` envelope, but older
//! deployments return bare payloads; [`ChatApi`] accepts both. Every row is
//! passed through the shape-tolerant normalizer, so legacy history rows with
//! misspelled keys or nested participants come back canonical.
//!
//! [`ChatBackend`] is the seam the reconciler depends on, letting tests
//! substitute a scripted backend for the real HTTP client.

use serde_json::Value;

use pawchat_proto::message::{ChatMessage, OutgoingMessage};
use pawchat_proto::normalize::normalize;

/// Errors from the REST chat endpoints.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The request could not be sent or the response body not read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),

    /// The server rejected the bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// The response body was not a usable payload.
    #[error("unusable response payload: {0}")]
    Payload(String),
}

/// Async backend for history retrieval and out-of-band sends.
///
/// Implemented by [`ChatApi`] for production and by scripted stubs in tests.
pub trait ChatBackend {
    /// Fetches the conversation with `partner_id`, oldest first.
    fn history(
        &self,
        partner_id: &str,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, RestError>> + Send;

    /// Sends a message over HTTP, returning the stored record.
    fn send(
        &self,
        out: &OutgoingMessage,
    ) -> impl Future<Output = Result<ChatMessage, RestError>> + Send;
}

/// HTTP client for the chat REST endpoints.
#[derive(Clone)]
pub struct ChatApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ChatApi {
    /// Creates a client for the given base URL (e.g. `http://host:9100`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<Value, RestError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RestError::Unauthorized);
        }
        if !status.is_success() {
            return Err(RestError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

impl ChatBackend for ChatApi {
    async fn history(&self, partner_id: &str) -> Result<Vec<ChatMessage>, RestError> {
        let response = self
            .authorized(self.client.get(format!("{}/api/chat/history", self.base_url)))
            .query(&[("friendId", partner_id)])
            .send()
            .await?;
        let body = Self::check(response).await?;

        let rows = unwrap_envelope(&body)
            .as_array()
            .ok_or_else(|| RestError::Payload("history payload is not an array".to_string()))?;

        // Rows that do not normalize to a displayable message (empty body or
        // missing participants) are dropped, not fatal.
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let normalized = normalize(row).filter(|m| {
                !m.content.is_empty() && !m.sender_id.is_empty() && !m.receiver_id.is_empty()
            });
            match normalized {
                Some(message) => messages.push(message),
                None => tracing::warn!(row = %row, "dropping unusable history row"),
            }
        }
        tracing::debug!(partner_id = %partner_id, count = messages.len(), "history fetched");
        Ok(messages)
    }

    async fn send(&self, out: &OutgoingMessage) -> Result<ChatMessage, RestError> {
        let response = self
            .authorized(self.client.post(format!("{}/api/chat/send", self.base_url)))
            .json(out)
            .send()
            .await?;
        let body = Self::check(response).await?;

        normalize(unwrap_envelope(&body))
            .ok_or_else(|| RestError::Payload("send response is not a message".to_string()))
    }
}

/// Unwraps the `{"data": …}` envelope if present, else returns the value
/// itself.
fn unwrap_envelope(body: &Value) -> &Value {
    body.get("data").unwrap_or(body)
}
