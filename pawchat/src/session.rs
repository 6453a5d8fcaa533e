//! Resilient WebSocket session to the chat broker.
//!
//! A [`Session`] owns a background task that connects, subscribes the user's
//! inbox, and keeps the connection alive: heartbeats while idle, a fixed
//! reconnect delay after a drop, and a terminal [`ConnectionStatus::Unauthorized`]
//! state when the broker rejects the credentials (no retry storm against a
//! dead token).
//!
//! Inbound message bodies are handed to the caller as raw JSON values; the
//! reconciler normalizes them. Outbound publishes are synchronous and
//! best-effort: [`Session::publish`] only reports whether the frame was
//! handed to the connected socket task.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use pawchat_proto::codec;
use pawchat_proto::frame::{ClientFrame, SEND_DESTINATION, ServerFrame, inbox_destination};
use pawchat_proto::message::OutgoingMessage;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait for the connection and the `Subscribed` ack.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Observable state of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No active connection; a reconnect may be pending.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Subscribed and live.
    Connected,
    /// The broker rejected the credentials. Terminal: no further retries.
    Unauthorized,
}

/// Connection parameters for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `ws://host:9100/ws`.
    pub ws_url: String,
    /// The local user whose inbox is subscribed.
    pub user_id: String,
    /// Bearer token attached to the upgrade request, if any.
    pub token: Option<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Heartbeat period. Twice this interval of silence tears the
    /// connection down.
    pub heartbeat_interval: Duration,
}

impl SessionConfig {
    /// Config with production timing defaults (3s reconnect, 15s heartbeat).
    #[must_use]
    pub fn new(ws_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            user_id: user_id.into(),
            token: None,
            reconnect_delay: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// Handle to a live broker session.
///
/// Dropping the handle (or calling [`Session::close`]) shuts the background
/// task down; close is idempotent.
pub struct Session {
    outbound_tx: mpsc::UnboundedSender<ClientFrame>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    _run_handle: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Opens a session and returns it together with the inbound message
    /// stream (raw JSON bodies delivered to the subscribed inbox).
    ///
    /// Returns immediately; connection progress is observable via
    /// [`Session::status`].
    #[must_use]
    pub fn open(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run_handle = tokio::spawn(run(config, status_tx, shutdown_rx, outbound_rx, inbound_tx));

        (
            Self {
                outbound_tx,
                status_rx,
                shutdown_tx,
                _run_handle: run_handle,
            },
            inbound_rx,
        )
    }

    /// Publishes an outbound message to the send destination.
    ///
    /// Returns `true` if the frame was handed to a connected socket task,
    /// `false` when disconnected or the frame could not be encoded. A `true`
    /// result is not a delivery guarantee; the broker echo is.
    #[must_use]
    pub fn publish(&self, out: &OutgoingMessage) -> bool {
        if !self.is_connected() {
            return false;
        }
        let body = match serde_json::to_value(out) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outgoing message");
                return false;
            }
        };
        let frame = ClientFrame::Send {
            destination: SEND_DESTINATION.to_string(),
            body,
        };
        self.outbound_tx.send(frame).is_ok()
    }

    /// Returns a watch receiver for observing connection state changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Whether the session is currently subscribed and live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.status_rx.borrow() == ConnectionStatus::Connected
    }

    /// Shuts the session down. Safe to call more than once.
    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Why a live connection ended.
enum Outcome {
    /// The socket dropped or went silent; reconnect applies.
    Disconnected,
    /// The caller closed the session.
    Shutdown,
    /// The broker reported an authorization failure mid-stream.
    Unauthorized,
}

#[derive(Debug, thiserror::Error)]
enum ConnectError {
    #[error("broker rejected credentials")]
    Unauthorized,
    #[error("handshake timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Failed(String),
}

/// Connection supervisor: connect, drive, back off, repeat.
async fn run(
    config: SessionConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
    inbound_tx: mpsc::UnboundedSender<serde_json::Value>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        status_tx.send_replace(ConnectionStatus::Connecting);

        match connect_and_subscribe(&config).await {
            Ok(ws) => {
                tracing::info!(user_id = %config.user_id, "session connected and subscribed");
                status_tx.send_replace(ConnectionStatus::Connected);
                match drive(ws, &config, &mut outbound_rx, &inbound_tx, &mut shutdown_rx).await {
                    Outcome::Unauthorized => {
                        tracing::warn!("authorization revoked, giving up");
                        status_tx.send_replace(ConnectionStatus::Unauthorized);
                        return;
                    }
                    Outcome::Shutdown => break,
                    Outcome::Disconnected => {
                        tracing::info!("session disconnected");
                        status_tx.send_replace(ConnectionStatus::Disconnected);
                    }
                }
            }
            Err(ConnectError::Unauthorized) => {
                tracing::warn!("broker rejected credentials, giving up");
                status_tx.send_replace(ConnectionStatus::Unauthorized);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection attempt failed");
                status_tx.send_replace(ConnectionStatus::Disconnected);
            }
        }

        // Fixed-delay reconnect, interruptible by shutdown.
        tokio::select! {
            () = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    status_tx.send_replace(ConnectionStatus::Disconnected);
    tracing::debug!("session task exiting");
}

/// Establishes the WebSocket connection and subscribes the user's inbox.
async fn connect_and_subscribe(config: &SessionConfig) -> Result<WsStream, ConnectError> {
    let mut request = config
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectError::Failed(e.to_string()))?;
    if let Some(token) = &config.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ConnectError::Failed(format!("invalid token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (mut ws, _response) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(map_ws_connect_error)?;

    let subscribe = ClientFrame::Subscribe {
        destination: inbox_destination(&config.user_id),
    };
    let text = codec::encode_client(&subscribe).map_err(|e| ConnectError::Failed(e.to_string()))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| ConnectError::Failed(format!("failed to send Subscribe: {e}")))?;

    // Wait for the Subscribed ack before reporting Connected.
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next())
            .await
            .map_err(|_| ConnectError::Timeout)?;
        match frame {
            Some(Ok(Message::Text(text))) => match codec::decode_server(text.as_str()) {
                Ok(ServerFrame::Subscribed { destination }) => {
                    tracing::debug!(destination = %destination, "inbox subscribed");
                    return Ok(ws);
                }
                Ok(frame) if frame.is_auth_error() => return Err(ConnectError::Unauthorized),
                Ok(ServerFrame::Error { reason }) => {
                    return Err(ConnectError::Failed(format!("subscription rejected: {reason}")));
                }
                Ok(other) => {
                    tracing::debug!(frame = ?other, "ignoring frame before Subscribed ack");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed frame during subscription, skipping");
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(ConnectError::Failed(
                    "connection closed during subscription".to_string(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectError::Failed(e.to_string())),
        }
    }
}

/// Maps a `tokio_tungstenite` connect error, classifying 401/403 upgrades.
fn map_ws_connect_error(err: WsError) -> ConnectError {
    match err {
        WsError::Http(response)
            if response.status() == 401 || response.status() == 403 =>
        {
            ConnectError::Unauthorized
        }
        WsError::Http(response) => {
            ConnectError::Failed(format!("upgrade failed: status {}", response.status()))
        }
        other => ConnectError::Failed(other.to_string()),
    }
}

/// Frame loop for one live connection.
///
/// Sends a `Ping` every heartbeat interval and treats two silent intervals
/// as a dead connection. Malformed inbound frames are logged and skipped.
async fn drive(
    ws: WsStream,
    config: &SessionConfig,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
    inbound_tx: &mpsc::UnboundedSender<serde_json::Value>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Outcome {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.reset(); // skip the immediate first tick
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_activity = Instant::now();
                    match codec::decode_server(text.as_str()) {
                        Ok(ServerFrame::Message { body, .. }) => {
                            if inbound_tx.send(body).is_err() {
                                // Consumer dropped; nothing left to deliver to.
                                return Outcome::Shutdown;
                            }
                        }
                        Ok(ServerFrame::Pong) => {}
                        Ok(ServerFrame::Subscribed { destination }) => {
                            tracing::debug!(destination = %destination, "duplicate Subscribed ack");
                        }
                        Ok(frame @ ServerFrame::Error { .. }) => {
                            if frame.is_auth_error() {
                                return Outcome::Unauthorized;
                            }
                            tracing::warn!(frame = ?frame, "broker error frame");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed inbound frame, skipping");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Outcome::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    return Outcome::Disconnected;
                }
            },
            Some(frame) = outbound_rx.recv() => {
                match codec::encode_client(&frame) {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            tracing::warn!("WebSocket write failed");
                            return Outcome::Disconnected;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to encode outbound frame"),
                }
            }
            _ = heartbeat.tick() => {
                if last_activity.elapsed() >= config.heartbeat_interval * 2 {
                    tracing::warn!("heartbeat silence, treating connection as dead");
                    return Outcome::Disconnected;
                }
                match codec::encode_client(&ClientFrame::Ping) {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            return Outcome::Disconnected;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to encode heartbeat"),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Outcome::Shutdown;
                }
            }
        }
    }
}
