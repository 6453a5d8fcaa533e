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

//! End-to-end send/receive through a live broker.
//!
//! Covers the optimistic send path: the sender sees a temp entry
//! immediately, the broker echo replaces it in place with the stored id,
//! and the receiver sees exactly one copy. Also verifies display ordering
//! across both directions of the conversation.

use std::time::Duration;

use pawchat::config::ClientConfig;
use pawchat::session::ConnectionStatus;
use pawchat::view::ChatView;
use pawchat_broker::broker;

fn client(addr: std::net::SocketAddr, user_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new(user_id);
    config.ws_url = format!("ws://{addr}/ws");
    config.rest_url = format!("http://{addr}");
    config.token = Some(user_id.to_string());
    config.reconnect_delay = Duration::from_millis(100);
    config
}

async fn connected_view(addr: std::net::SocketAddr, user_id: &str) -> ChatView {
    let view = ChatView::open(&client(addr, user_id));
    let mut status = view.connection_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .expect("connect timed out")
    .expect("status channel closed");
    view
}

/// Polls until the view's message list satisfies `predicate`.
async fn wait_until(view: &ChatView, predicate: impl Fn(&ChatView) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if predicate(view) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn receiver_sees_exactly_one_copy() {
    let (addr, _handle) = broker::start_server("127.0.0.1:0").await.unwrap();

    let buyer = connected_view(addr, "u1").await;
    let agent = connected_view(addr, "u2").await;
    buyer.select_partner("u2").await;
    agent.select_partner("u1").await;

    buyer.send("which litter is best for kittens?").await.unwrap();

    wait_until(&agent, |v| !v.messages().is_empty()).await;
    let messages = agent.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "which litter is best for kittens?");
    assert_eq!(messages[0].sender_id, "u1");
    assert!(!messages[0].is_temp());
}

#[tokio::test]
async fn sender_echo_replaces_optimistic_entry() {
    let (addr, _handle) = broker::start_server("127.0.0.1:0").await.unwrap();

    let buyer = connected_view(addr, "u1").await;
    let _agent = connected_view(addr, "u2").await;
    buyer.select_partner("u2").await;

    let temp = buyer.send("hello").await.unwrap();
    assert!(temp.is_temp());

    // The broker echo carries the client_ref and the authoritative id.
    wait_until(&buyer, |v| v.messages().iter().all(|m| !m.is_temp())).await;
    let messages = buyer.messages();
    assert_eq!(messages.len(), 1, "echo must replace, not duplicate");
    assert_ne!(messages[0].id, temp.id);
    assert_eq!(messages[0].content, "hello");
}

#[tokio::test]
async fn conversation_stays_ordered_across_directions() {
    let (addr, _handle) = broker::start_server("127.0.0.1:0").await.unwrap();

    let buyer = connected_view(addr, "u1").await;
    let agent = connected_view(addr, "u2").await;
    buyer.select_partner("u2").await;
    agent.select_partner("u1").await;

    buyer.send("first").await.unwrap();
    wait_until(&agent, |v| v.messages().len() == 1).await;
    agent.send("second").await.unwrap();
    wait_until(&buyer, |v| v.messages().len() == 2).await;
    wait_until(&buyer, |v| v.messages().iter().all(|m| !m.is_temp())).await;

    let contents: Vec<_> = buyer.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, ["first", "second"]);

    wait_until(&agent, |v| v.messages().len() == 2).await;
    for pair in agent.messages().windows(2) {
        assert!(pair[0].timestamp_ms() <= pair[1].timestamp_ms());
    }
}

#[tokio::test]
async fn messages_for_other_conversations_stay_hidden() {
    let (addr, _handle) = broker::start_server("127.0.0.1:0").await.unwrap();

    let buyer = connected_view(addr, "u1").await;
    let agent = connected_view(addr, "u2").await;
    let other = connected_view(addr, "u3").await;
    buyer.select_partner("u2").await;
    agent.select_partner("u1").await;
    other.select_partner("u1").await;

    // u3 writes to u1 while u1 is talking to u2.
    other.send("unrelated question").await.unwrap();
    buyer.send("for u2 only").await.unwrap();

    wait_until(&agent, |v| !v.messages().is_empty()).await;
    assert!(
        buyer.messages().iter().all(|m| m.content != "unrelated question"),
        "u3's message must not appear in the u1/u2 conversation"
    );
}
