//! Pawchat client core.
//!
//! The realtime support-chat layer of the pawstore storefront: a resilient
//! WebSocket session ([`session`]), a REST history/send client ([`rest`]),
//! the delivery reconciler that keeps the visible conversation deduplicated
//! and ordered ([`reconcile`]), and the conversation view model that ties
//! them together ([`view`]).

pub mod config;
pub mod reconcile;
pub mod rest;
pub mod session;
pub mod view;
