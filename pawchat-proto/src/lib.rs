//! `pawchat-proto` — wire protocol library for the pawchat support channel.
//!
//! Defines the canonical [`message::ChatMessage`] record, the shape-tolerant
//! [`normalize`] mapping, the broker [`frame`] types, and the JSON [`codec`].

pub mod codec;
pub mod frame;
pub mod message;
pub mod normalize;
