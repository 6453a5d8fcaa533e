//! Property-based tests for the message normalizer and frame codec.
//!
//! Uses proptest to verify:
//! 1. `normalize` is total: arbitrary JSON never panics.
//! 2. Normalizing an already-canonical message is idempotent.
//! 3. Arbitrary text never causes a panic in the frame decoders.
//! 4. Client and server frames survive encode → decode round-trips.

use proptest::prelude::*;
use serde_json::{Value, json};

use pawchat_proto::codec;
use pawchat_proto::frame::{ClientFrame, ServerFrame};
use pawchat_proto::message::ChatMessage;
use pawchat_proto::normalize::normalize;

// --- Strategies ---

/// Strategy for arbitrary JSON values, including nested objects and arrays.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(Value::from),
        ".{0,32}".prop_map(Value::from),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::from),
            prop::collection::hash_map(".{0,16}", inner, 0..8)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Strategy for canonical-shaped message payloads.
fn arb_canonical_payload() -> impl Strategy<Value = Value> {
    (
        "[a-z0-9]{1,12}",
        "[a-z0-9]{1,12}",
        "[a-z0-9]{1,12}",
        "[^\x00]{1,128}",
        0_i64..4_102_444_800_000, // up to year 2100 in millis
    )
        .prop_map(|(id, sender, receiver, content, millis)| {
            let created_at = chrono::DateTime::from_timestamp_millis(millis)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            json!({
                "id": id,
                "senderId": sender,
                "receiverId": receiver,
                "content": content,
                "createdAt": created_at,
            })
        })
}

/// Strategy for arbitrary client frames.
fn arb_client_frame() -> impl Strategy<Value = ClientFrame> {
    prop_oneof![
        ".{0,32}".prop_map(|destination| ClientFrame::Subscribe { destination }),
        ".{0,32}".prop_map(|destination| ClientFrame::Unsubscribe { destination }),
        (".{0,32}", arb_json()).prop_map(|(destination, body)| ClientFrame::Send {
            destination,
            body
        }),
        Just(ClientFrame::Ping),
    ]
}

/// Strategy for arbitrary server frames.
fn arb_server_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        ".{0,32}".prop_map(|destination| ServerFrame::Subscribed { destination }),
        (".{0,32}", arb_json()).prop_map(|(destination, body)| ServerFrame::Message {
            destination,
            body
        }),
        ".{0,64}".prop_map(|reason| ServerFrame::Error { reason }),
        Just(ServerFrame::Pong),
    ]
}

// --- Properties ---

proptest! {
    /// `normalize` must accept any JSON without panicking.
    #[test]
    fn normalize_is_total(raw in arb_json()) {
        let _ = normalize(&raw);
    }

    /// A canonical payload normalizes, and normalizing its serialized form
    /// again yields the same message.
    #[test]
    fn normalize_is_idempotent_on_canonical(raw in arb_canonical_payload()) {
        let once = normalize(&raw).expect("canonical payload must normalize");
        let serialized = serde_json::to_value(&once).expect("serialize");
        let twice = normalize(&serialized).expect("canonical message must re-normalize");
        prop_assert_eq!(once, twice);
    }

    /// Normalized canonical payloads keep their identifying fields.
    #[test]
    fn normalize_preserves_canonical_fields(raw in arb_canonical_payload()) {
        let msg = normalize(&raw).expect("canonical payload must normalize");
        prop_assert_eq!(msg.id.as_str(), raw["id"].as_str().expect("id"));
        prop_assert_eq!(msg.sender_id.as_str(), raw["senderId"].as_str().expect("senderId"));
        prop_assert_eq!(msg.receiver_id.as_str(), raw["receiverId"].as_str().expect("receiverId"));
    }

    /// Arbitrary text must never panic the decoders.
    #[test]
    fn decoders_reject_garbage_gracefully(text in ".{0,256}") {
        let _ = codec::decode_client(&text);
        let _ = codec::decode_server(&text);
    }

    /// Client frames survive an encode → decode round-trip.
    #[test]
    fn client_frame_round_trip(frame in arb_client_frame()) {
        let encoded = codec::encode_client(&frame).expect("encode");
        let decoded = codec::decode_client(&encoded).expect("decode");
        prop_assert_eq!(frame, decoded);
    }

    /// Server frames survive an encode → decode round-trip.
    #[test]
    fn server_frame_round_trip(frame in arb_server_frame()) {
        let encoded = codec::encode_server(&frame).expect("encode");
        let decoded = codec::decode_server(&encoded).expect("decode");
        prop_assert_eq!(frame, decoded);
    }

    /// A `ChatMessage` survives a serde round-trip unchanged.
    #[test]
    fn chat_message_serde_round_trip(raw in arb_canonical_payload()) {
        let msg = normalize(&raw).expect("canonical payload must normalize");
        let text = serde_json::to_string(&msg).expect("serialize");
        let back: ChatMessage = serde_json::from_str(&text).expect("deserialize");
        prop_assert_eq!(msg, back);
    }
}
