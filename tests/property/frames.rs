//! Property-based tests for the chat socket frame codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never causes a panic in `decode_event`.
//! 2. Well-formed frames with an unrecognized `type` decode to `None`.
//! 3. Well-formed frames with a recognized `type` keep their routing fields.

use matchchat_proto::codec;
use matchchat_proto::frame::{EventKind, KIND_MATCH, KIND_MESSAGE, WireFrame};
use matchchat_proto::message::ConversationId;
use proptest::prelude::*;

/// Strategy for frame kinds that the client does not understand.
fn arb_unknown_kind() -> impl Strategy<Value = String> {
    "[a-z_]{0,16}".prop_filter("must not be a known kind", |k| {
        k != KIND_MESSAGE && k != KIND_MATCH
    })
}

/// Strategy for well-formed frames of a known kind.
fn arb_known_frame() -> impl Strategy<Value = WireFrame> {
    (
        prop_oneof![Just(KIND_MESSAGE), Just(KIND_MATCH)],
        proptest::option::of(any::<i64>()),
        proptest::option::of(".{0,64}"),
        proptest::option::of(any::<i64>()),
        proptest::option::of(any::<i64>()),
    )
        .prop_map(|(kind, id, content, chat_id, user_id)| WireFrame {
            id,
            kind: kind.to_string(),
            content,
            chat_id,
            user_id,
        })
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(text in ".{0,256}") {
        let _ = codec::decode_event(&text);
    }

    #[test]
    fn unknown_kinds_are_dropped(kind in arb_unknown_kind(), chat_id in any::<i64>()) {
        let text = format!(r#"{{"type":"{kind}","chat_id":{chat_id}}}"#);
        let decoded = codec::decode_event(&text).unwrap();
        prop_assert!(decoded.is_none());
    }

    #[test]
    fn known_frames_keep_routing_fields(frame in arb_known_frame()) {
        let text = codec::encode(&frame).unwrap();
        let event = codec::decode_event(&text).unwrap().unwrap();
        prop_assert_eq!(event.kind, EventKind::from_wire(&frame.kind).unwrap());
        prop_assert_eq!(event.conversation_id, frame.chat_id.map(ConversationId::new));
        prop_assert_eq!(event.content, frame.content);
    }
}
