//! REST endpoints: conversation history and an HTTP send path.
//!
//! Mirrors the storefront API the chat client already speaks:
//! `GET /api/chat/history?friendId=…` and `POST /api/chat/send`, both
//! returning `{"data": …}` envelopes. The requesting user is derived from
//! the bearer token, which in this broker carries the user id directly.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;

use pawchat_proto::message::OutgoingMessage;

use crate::broker::BrokerState;

/// Builds the REST routes, to be merged into the broker router.
pub fn routes() -> axum::Router<Arc<BrokerState>> {
    axum::Router::new()
        .route("/api/chat/history", get(history_handler))
        .route("/api/chat/send", post(send_handler))
}

/// Extracts the bearer token from an `Authorization` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn error_response(status: StatusCode, reason: &str) -> Response {
    (status, Json(json!({ "error": reason }))).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    friend_id: Option<String>,
}

/// `GET /api/chat/history?friendId=…` — the requester's conversation with
/// `friendId`, oldest first.
async fn history_handler(
    State(state): State<Arc<BrokerState>>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> Response {
    let Some(user_id) = bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized: missing bearer token");
    };
    let Some(friend_id) = params.friend_id.filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing friendId parameter");
    };

    let rows = state.store.history(&user_id, &friend_id).await;
    tracing::debug!(user_id = %user_id, friend_id = %friend_id, count = rows.len(), "history served");
    Json(json!({ "data": rows })).into_response()
}

/// `POST /api/chat/send` — persists a message without a socket, returning
/// the stored record. Used by clients whose connection is down.
async fn send_handler(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(mut out): Json<OutgoingMessage>,
) -> Response {
    let Some(user_id) = bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized: missing bearer token");
    };
    if let Err(e) = out.validate() {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }
    if out.sender_id != user_id {
        tracing::warn!(user_id = %user_id, claimed = %out.sender_id, "REST sender mismatch, enforcing token identity");
        out.sender_id = user_id;
    }

    let message = state.store.append(&out).await;
    tracing::debug!(id = %message.id, from = %message.sender_id, to = %message.receiver_id, "message stored via REST");

    crate::broker::notify_stored(&state, &message).await;

    Json(json!({ "data": message })).into_response()
}
