// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Authorization failure handling.
//!
//! A broker configured with a required token must reject bad credentials at
//! the upgrade, and the session must treat that as terminal Unauthorized
//! instead of hammering the broker with retries.

use std::sync::Arc;
use std::time::Duration;

use pawchat::config::ClientConfig;
use pawchat::rest::{ChatApi, ChatBackend, RestError};
use pawchat::session::{ConnectionStatus, Session, SessionConfig};
use pawchat::view::ChatView;
use pawchat_broker::broker::{BrokerState, start_server_with_state};
use pawchat_broker::store::ChatStore;

async fn start_locked_broker(token: &str) -> (std::net::SocketAddr, Arc<BrokerState>) {
    let state = Arc::new(BrokerState::with_config(
        ChatStore::new(),
        Some(token.to_string()),
    ));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

fn session_config(addr: std::net::SocketAddr, user_id: &str, token: &str) -> SessionConfig {
    let mut config = SessionConfig::new(format!("ws://{addr}/ws"), user_id);
    config.token = Some(token.to_string());
    config.reconnect_delay = Duration::from_millis(50);
    config
}

#[tokio::test]
async fn wrong_token_is_terminal_unauthorized() {
    let (addr, _state) = start_locked_broker("secret").await;

    let (session, _inbound) = Session::open(session_config(addr, "u1", "wrong"));
    let mut status = session.status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConnectionStatus::Unauthorized),
    )
    .await
    .expect("never reached Unauthorized")
    .expect("status channel closed");

    // Several reconnect delays later the session must still be parked.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*status.borrow(), ConnectionStatus::Unauthorized);
}

#[tokio::test]
async fn missing_token_is_rejected_too() {
    let (addr, _state) = start_locked_broker("secret").await;

    let (session, _inbound) = {
        let mut config = SessionConfig::new(format!("ws://{addr}/ws"), "u1");
        config.reconnect_delay = Duration::from_millis(50);
        Session::open(config)
    };
    let mut status = session.status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConnectionStatus::Unauthorized),
    )
    .await
    .expect("never reached Unauthorized")
    .expect("status channel closed");
}

#[tokio::test]
async fn correct_token_connects_and_chats() {
    let (addr, _state) = start_locked_broker("secret").await;

    let (buyer, _buyer_inbound) = Session::open(session_config(addr, "u1", "secret"));
    let (agent, mut agent_inbound) = Session::open(session_config(addr, "u2", "secret"));
    let mut buyer_status = buyer.status();
    let mut agent_status = agent.status();
    for status in [&mut buyer_status, &mut agent_status] {
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == ConnectionStatus::Connected),
        )
        .await
        .expect("connect timed out")
        .expect("status channel closed");
    }

    assert!(buyer.publish(&pawchat_proto::message::OutgoingMessage {
        sender_id: "u1".into(),
        receiver_id: "u2".into(),
        content: "token works".into(),
        client_ref: None,
    }));

    let body = tokio::time::timeout(Duration::from_secs(5), agent_inbound.recv())
        .await
        .expect("inbound recv timed out")
        .expect("inbound channel closed");
    assert_eq!(body["content"], "token works");
}

#[tokio::test]
async fn rest_without_token_is_unauthorized() {
    let (addr, _state) = start_locked_broker("secret").await;

    let api = ChatApi::new(format!("http://{addr}"), None);
    let result = api.history("u2").await;
    assert!(matches!(result, Err(RestError::Unauthorized)));
}

#[tokio::test]
async fn unauthorized_view_still_renders_empty_conversation() {
    let (addr, _state) = start_locked_broker("secret").await;

    let mut config = ClientConfig::new("u1");
    config.ws_url = format!("ws://{addr}/ws");
    config.rest_url = format!("http://{addr}");
    config.token = Some("wrong".to_string());
    config.reconnect_delay = Duration::from_millis(50);

    let view = ChatView::open(&config);
    let mut status = view.connection_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConnectionStatus::Unauthorized),
    )
    .await
    .expect("never reached Unauthorized")
    .expect("status channel closed");

    // History degrades to empty instead of erroring the UI.
    let messages = view.select_partner("u2").await;
    assert!(messages.is_empty());
}
