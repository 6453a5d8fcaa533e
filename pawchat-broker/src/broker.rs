//! Broker core: shared state, WebSocket handling, inbox registry, and
//! message routing.
//!
//! Each connected client subscribes to its own inbox destination
//! (`/queue/chat.<userId>`) and publishes outbound messages to
//! `/app/chat.send`. Accepted messages are persisted in the [`ChatStore`]
//! and delivered as [`ServerFrame::Message`] frames to both participants'
//! inboxes — the sender echo is what lets clients reconcile optimistic
//! entries.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use pawchat_proto::codec;
use pawchat_proto::frame::{ClientFrame, SEND_DESTINATION, ServerFrame, inbox_destination, inbox_user};
use pawchat_proto::message::{ChatMessage, OutgoingMessage};

use crate::http;
use crate::store::ChatStore;

/// Shared broker state holding the inbox registry and message store.
pub struct BrokerState {
    /// Maps user id to a channel sender for delivering WebSocket frames.
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
    /// Persisted conversation history.
    pub store: ChatStore,
    /// When set, the WebSocket upgrade requires this exact bearer token.
    required_token: Option<String>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    /// Creates broker state with an empty registry, a default store, and no
    /// required token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            store: ChatStore::new(),
            required_token: None,
        }
    }

    /// Creates broker state with a custom store and optional required token.
    #[must_use]
    pub fn with_config(store: ChatStore, required_token: Option<String>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            store,
            required_token,
        }
    }

    /// Checks a bearer token against the configured requirement.
    #[must_use]
    pub fn token_accepted(&self, bearer: Option<&str>) -> bool {
        self.required_token
            .as_deref()
            .is_none_or(|required| bearer == Some(required))
    }

    /// Registers a user's inbox, storing the sender half of its frame
    /// channel. A duplicate subscription replaces the old connection.
    pub async fn register(
        &self,
        user_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        let mut conns = self.connections.write().await;
        conns.insert(user_id.to_string(), sender)
    }

    /// Removes a user's inbox from the registry.
    pub async fn unregister(&self, user_id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let mut conns = self.connections.write().await;
        conns.remove(user_id)
    }

    /// Returns a clone of the frame sender for the given user, if connected.
    pub async fn get_sender(&self, user_id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns.get(user_id).cloned()
    }

    /// Sends a WebSocket Close frame to every connected client.
    ///
    /// Triggers client-side disconnect detection; used for graceful shutdown
    /// and reconnect testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user_id, sender) in conns.iter() {
            tracing::info!(user_id = %user_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// Lifecycle:
/// 1. Wait for a `Subscribe` frame naming an inbox destination.
/// 2. Register the inbox and acknowledge with `Subscribed`.
/// 3. Enter the frame loop: route `Send` frames, answer `Ping` with `Pong`.
/// 4. On disconnect or `Unsubscribe`, unregister the inbox.
pub async fn handle_socket(socket: WebSocket, state: Arc<BrokerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user_id) = wait_for_subscribe(&mut ws_receiver).await else {
        tracing::warn!("connection closed before subscription");
        return;
    };

    // Create the frame channel for this client's writer task.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    if state.register(&user_id, tx.clone()).await.is_some() {
        tracing::info!(user_id = %user_id, "replaced existing subscription");
    }

    let ack = ServerFrame::Subscribed {
        destination: inbox_destination(&user_id),
    };
    if send_frame(&mut ws_sender, &ack).await.is_err() {
        tracing::warn!(user_id = %user_id, "failed to send Subscribed ack");
        state.unregister(&user_id).await;
        return;
    }

    tracing::info!(user_id = %user_id, "inbox subscribed");

    // Writer task: forward frames from the channel to the WebSocket.
    let writer_user_id = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user_id = %writer_user_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader task: process frames from this client.
    let reader_user_id = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if handle_client_frame(&reader_user_id, text.as_str(), &tx, &reader_state)
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::info!(user_id = %reader_user_id, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping and pong frames are ignored.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(&user_id).await;
    tracing::info!(user_id = %user_id, "client disconnected and unregistered");
}

/// Waits for the first frame, expecting `Subscribe` on an inbox destination.
///
/// Returns the inbox user id, or `None` if the connection closes or the
/// first frame is not a valid subscription.
async fn wait_for_subscribe(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match codec::decode_client(text.as_str()) {
                Ok(ClientFrame::Subscribe { destination }) => {
                    return match inbox_user(&destination) {
                        Some(user_id) => Some(user_id.to_string()),
                        None => {
                            tracing::warn!(destination = %destination, "invalid inbox destination");
                            None
                        }
                    };
                }
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected Subscribe, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode subscription frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-text frames during subscription.
            }
        }
    }
    None
}

/// Handles a decoded text frame from a subscribed client.
///
/// Returns `Break` when the session should end (client unsubscribed).
async fn handle_client_frame(
    user_id: &str,
    text: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &Arc<BrokerState>,
) -> ControlFlow<()> {
    let frame = match codec::decode_client(text) {
        Ok(f) => f,
        Err(e) => {
            // Malformed frames are logged and skipped, never disconnect.
            tracing::warn!(user_id = %user_id, error = %e, "malformed frame, skipping");
            return ControlFlow::Continue(());
        }
    };

    match frame {
        ClientFrame::Send { destination, body } => {
            if destination == SEND_DESTINATION {
                handle_publish(user_id, &body, state).await;
            } else {
                tracing::warn!(user_id = %user_id, destination = %destination, "unknown send destination");
                send_on_channel(
                    tx,
                    &ServerFrame::Error {
                        reason: format!("unknown destination: {destination}"),
                    },
                );
            }
            ControlFlow::Continue(())
        }
        ClientFrame::Ping => {
            send_on_channel(tx, &ServerFrame::Pong);
            ControlFlow::Continue(())
        }
        ClientFrame::Unsubscribe { destination } => {
            tracing::info!(user_id = %user_id, destination = %destination, "unsubscribe");
            ControlFlow::Break(())
        }
        ClientFrame::Subscribe { destination } => {
            tracing::warn!(
                user_id = %user_id,
                destination = %destination,
                "duplicate Subscribe ignored (one inbox per session)"
            );
            ControlFlow::Continue(())
        }
    }
}

/// Persists a published message body and delivers it to both inboxes.
async fn handle_publish(user_id: &str, body: &serde_json::Value, state: &Arc<BrokerState>) {
    let out: OutgoingMessage = match serde_json::from_value(body.clone()) {
        Ok(out) => out,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "unparseable publish body, dropping");
            return;
        }
    };
    if let Err(e) = out.validate() {
        tracing::warn!(user_id = %user_id, error = %e, "invalid publish body, dropping");
        return;
    }

    // The connection's subscription identity wins over the claimed sender.
    let mut out = out;
    if out.sender_id != user_id {
        tracing::warn!(
            user_id = %user_id,
            claimed = %out.sender_id,
            "sender id mismatch, enforcing subscription identity"
        );
        out.sender_id = user_id.to_string();
    }

    let message = state.store.append(&out).await;
    tracing::debug!(
        id = %message.id,
        from = %message.sender_id,
        to = %message.receiver_id,
        "routing message"
    );

    notify_stored(state, &message).await;
}

/// Delivers an already-persisted message to both participants' inboxes.
///
/// The sender echo is deliberate: the authoritative copy replaces the
/// sender's optimistic entry. Also used by the REST send path so socket
/// subscribers see messages sent over HTTP.
pub async fn notify_stored(state: &Arc<BrokerState>, message: &ChatMessage) {
    deliver(state, &message.receiver_id, message).await;
    if message.sender_id != message.receiver_id {
        deliver(state, &message.sender_id, message).await;
    }
}

/// Delivers a persisted message to one user's inbox, if connected.
async fn deliver(state: &Arc<BrokerState>, user_id: &str, message: &ChatMessage) {
    let Some(sender) = state.get_sender(user_id).await else {
        tracing::debug!(user_id = %user_id, "recipient offline, history only");
        return;
    };
    match serde_json::to_value(message) {
        Ok(body) => {
            let frame = ServerFrame::Message {
                destination: inbox_destination(user_id),
                body,
            };
            if let Ok(text) = codec::encode_server(&frame)
                && sender.send(Message::Text(text.into())).is_err()
            {
                tracing::warn!(user_id = %user_id, "inbox delivery failed, unregistering");
                state.unregister(user_id).await;
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize message for delivery"),
    }
}

/// Encodes a server frame onto a client's frame channel (best effort).
fn send_on_channel(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    if let Ok(text) = codec::encode_server(frame) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

/// Encodes and sends a server frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let text = codec::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Builds the broker router: the WebSocket endpoint plus the REST surface.
fn app(state: Arc<BrokerState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .merge(http::routes())
        .with_state(state)
}

/// Starts the broker on the given address, returning the bound address and a
/// join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BrokerState::new())).await
}

/// Starts the broker with pre-configured [`BrokerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BrokerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let router = app(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "broker server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that checks the bearer token and upgrades to a WebSocket.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    headers: axum::http::HeaderMap,
    axum::extract::State(state): axum::extract::State<Arc<BrokerState>>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    if !state.token_accepted(http::bearer_token(&headers).as_deref()) {
        tracing::warn!("rejecting socket upgrade: bad or missing bearer token");
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}
