//! Conversation view model.
//!
//! [`ChatView`] wires the transport session, the REST backend, and the
//! reconciler into the single handle a storefront front-end drives: select a
//! partner, send messages, render the snapshot. A revision counter exposed
//! as a watch channel tells observers when the visible list changed.

use std::sync::Arc;

use tokio::sync::watch;

use pawchat_proto::message::ChatMessage;

use crate::config::ClientConfig;
use crate::reconcile::{Reconciler, SendError};
use crate::rest::ChatApi;
use crate::session::{ConnectionStatus, Session, SessionConfig};

/// History-load progress for the active conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No conversation selected yet.
    Idle,
    /// History fetch in progress; the visible list is already cleared.
    Loading,
    /// History seeded (possibly empty after a degraded fetch).
    Ready,
}

/// The support-chat handle for one signed-in user.
pub struct ChatView {
    session: Arc<Session>,
    reconciler: Arc<Reconciler<Arc<Session>, ChatApi>>,
    load_state_tx: watch::Sender<LoadState>,
    revision_tx: Arc<watch::Sender<u64>>,
    _pump_handle: tokio::task::JoinHandle<()>,
    _status_handle: tokio::task::JoinHandle<()>,
}

impl ChatView {
    /// Opens the chat layer: connects the session and starts the inbound
    /// pump. Returns immediately; connection progress is observable via
    /// [`ChatView::connection_status`].
    #[must_use]
    pub fn open(config: &ClientConfig) -> Self {
        let mut session_config = SessionConfig::new(config.ws_url.clone(), config.user_id.clone());
        session_config.token = config.token.clone();
        session_config.reconnect_delay = config.reconnect_delay;
        session_config.heartbeat_interval = config.heartbeat_interval;

        let (session, mut inbound_rx) = Session::open(session_config);
        let session = Arc::new(session);

        let api = ChatApi::new(config.rest_url.clone(), config.token.clone());
        let reconciler = Arc::new(Reconciler::new(
            config.user_id.clone(),
            Arc::clone(&session),
            api,
        ));

        let (load_state_tx, _) = watch::channel(LoadState::Idle);
        let revision_tx = Arc::new(watch::channel(0_u64).0);

        // Inbound pump: every socket payload goes through the reconciler.
        let pump_reconciler = Arc::clone(&reconciler);
        let pump_revision = Arc::clone(&revision_tx);
        let pump_handle = tokio::spawn(async move {
            while let Some(body) = inbound_rx.recv().await {
                if pump_reconciler.on_inbound(&body) {
                    pump_revision.send_modify(|rev| *rev += 1);
                }
            }
            tracing::debug!("inbound pump exiting");
        });

        // Status watcher: a drop while a send is unacknowledged means its
        // echo is lost for good, so the in-flight slot must be freed.
        let mut status_rx = session.status();
        let watch_reconciler = Arc::clone(&reconciler);
        let status_handle = tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                if *status_rx.borrow() != ConnectionStatus::Connected {
                    watch_reconciler.on_disconnect();
                }
            }
        });

        Self {
            session,
            reconciler,
            load_state_tx,
            revision_tx,
            _pump_handle: pump_handle,
            _status_handle: status_handle,
        }
    }

    /// Switches the active conversation and loads its history.
    pub async fn select_partner(&self, partner_id: &str) -> Vec<ChatMessage> {
        self.load_state_tx.send_replace(LoadState::Loading);
        let messages = self.reconciler.select_partner(partner_id).await;
        self.load_state_tx.send_replace(LoadState::Ready);
        self.revision_tx.send_modify(|rev| *rev += 1);
        messages
    }

    /// Sends a message to the active partner.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::send`].
    pub async fn send(&self, content: &str) -> Result<ChatMessage, SendError> {
        let result = self.reconciler.send(content).await;
        // Failed sends still leave an unconfirmed entry visible; only the
        // pure no-op rejections skip the revision bump.
        if !matches!(
            result,
            Err(SendError::NoPartner | SendError::InFlight | SendError::Invalid(_))
        ) {
            self.revision_tx.send_modify(|rev| *rev += 1);
        }
        result
    }

    /// Snapshot of the visible conversation, ordered for display.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.reconciler.messages()
    }

    /// The active conversation partner, if any.
    #[must_use]
    pub fn partner(&self) -> Option<String> {
        self.reconciler.partner()
    }

    /// Watch channel for connection state changes.
    #[must_use]
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.session.status()
    }

    /// Watch channel for history-load progress.
    #[must_use]
    pub fn load_state(&self) -> watch::Receiver<LoadState> {
        self.load_state_tx.subscribe()
    }

    /// Watch channel bumped whenever the visible list changes.
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    /// Shuts the chat layer down. Safe to call more than once.
    pub fn close(&self) {
        self.session.close();
    }
}
