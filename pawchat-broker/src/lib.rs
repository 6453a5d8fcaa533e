//! Pawchat broker library.
//!
//! Exposes the broker server for use in tests and embedding. The broker
//! accepts WebSocket subscriptions on per-user inbox destinations, routes
//! published chat messages, and serves the REST history/send endpoints.

pub mod broker;
pub mod config;
pub mod http;
pub mod store;
