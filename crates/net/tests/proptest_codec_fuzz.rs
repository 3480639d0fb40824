//! Fuzz-style property tests for the wire codec
//!
//! These tests validate that decoding handles arbitrary input without
//! panicking and that every message kind survives an encode/decode trip.

use arena_core::{Color, EntityKind, PeerId, Vec2};
use arena_net::registry::recover_unknown;
use arena_net::{decode, encode, EntityPositionRecord, EntityStateRecord, Message, MessageRegistry};
use proptest::prelude::*;

fn peer() -> impl Strategy<Value = PeerId> {
    "[a-zA-Z0-9_-]{1,16}".prop_map(PeerId::new)
}

fn coord() -> impl Strategy<Value = f32> {
    -1.0e6f32..1.0e6f32
}

fn vec2() -> impl Strategy<Value = Vec2> {
    (coord(), coord()).prop_map(|(x, y)| Vec2::new(x, y))
}

fn position_record() -> impl Strategy<Value = EntityPositionRecord> {
    (any::<u32>(), vec2(), vec2(), 0.0f32..1000.0).prop_map(|(id, position, velocity, health)| {
        EntityPositionRecord {
            id,
            position,
            velocity,
            health,
        }
    })
}

fn state_record() -> impl Strategy<Value = EntityStateRecord> {
    (any::<u32>(), any::<bool>(), vec2(), 0.0f32..1000.0).prop_map(
        |(id, hostile, position, health)| EntityStateRecord {
            id,
            kind: if hostile {
                EntityKind::Hostile
            } else {
                EntityKind::Player
            },
            position,
            health,
        },
    )
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (peer(), "[a-zA-Z0-9 ]{0,16}", any::<(u8, u8, u8)>(), any::<u32>()).prop_map(
            |(peer, name, (r, g, b), player_id)| Message::Connect {
                peer,
                name,
                color: Color::rgb(r, g, b),
                player_id,
            }
        ),
        peer().prop_map(|peer| Message::Disconnect { peer }),
        (peer(), vec2(), vec2()).prop_map(|(peer, position, velocity)| Message::Move {
            peer,
            position,
            velocity,
        }),
        (peer(), vec2(), 0.0f32..200.0).prop_map(|(peer, position, health)| {
            Message::PlayerState {
                peer,
                position,
                health,
            }
        }),
        (peer(), any::<u32>(), vec2(), vec2()).prop_map(|(shooter, seq, position, velocity)| {
            Message::Bullet {
                shooter,
                seq,
                position,
                velocity,
            }
        }),
        (peer(), peer(), 0.0f32..500.0, any::<u32>()).prop_map(
            |(target, attacker, damage, seq)| Message::PlayerHit {
                target,
                attacker,
                damage,
                seq,
            }
        ),
        (any::<u32>(), vec2(), 0.0f32..500.0).prop_map(|(id, position, health)| {
            Message::EntityAdd {
                id,
                position,
                health,
            }
        }),
        any::<u32>().prop_map(|id| Message::EntityRemove { id }),
        (any::<u32>(), peer(), 0.0f32..500.0, 0.0f32..500.0, any::<u32>()).prop_map(
            |(id, shooter, damage, health, seq)| Message::EntityDamage {
                id,
                shooter,
                damage,
                health,
                seq,
            }
        ),
        prop::collection::vec(position_record(), 0..20).prop_map(Message::EntityPositions),
        prop::collection::vec(state_record(), 0..20).prop_map(Message::EntityState),
        prop::collection::vec(any::<u32>(), 0..50).prop_map(Message::EntityValidate),
        (any::<u32>(), peer(), any::<u32>()).prop_map(|(id, killer, seq)| Message::Kill {
            id,
            killer,
            seq,
        }),
        (peer(), any::<bool>()).prop_map(|(peer, ready)| Message::Ready { peer, ready }),
        any::<u64>().prop_map(|seed| Message::StartGame { seed }),
        (peer(), "[a-zA-Z0-9 .!?]{0,64}").prop_map(|(peer, text)| Message::Chat { peer, text }),
        peer().prop_map(|peer| Message::SettingsRequest { peer }),
    ]
}

proptest! {
    /// Property: every message kind round-trips through its wire record
    #[test]
    fn message_roundtrips(msg in message()) {
        let wire = encode(&msg);
        prop_assert_eq!(decode(&wire), msg);
    }

    /// Property: the registry decodes exactly like the bare codec
    #[test]
    fn registry_matches_codec(msg in message()) {
        let wire = encode(&msg);
        let registry = MessageRegistry::with_defaults();
        prop_assert_eq!(registry.decode(&wire), decode(&wire));
    }

    /// Property: arbitrary text never panics the decoder or recovery path
    #[test]
    fn arbitrary_text_does_not_panic(raw in ".{0,600}") {
        let _ = decode(&raw);
        let _ = recover_unknown(&raw);
    }

    /// Property: arbitrary bytes, lossily decoded, never panic the decoder
    #[test]
    fn arbitrary_bytes_do_not_panic(
        bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let raw = String::from_utf8_lossy(&bytes);
        let _ = decode(&raw);
    }

    /// Property: known tags with garbage fields never panic
    #[test]
    fn known_tag_with_garbage_fields(
        tag in prop::sample::select(vec![
            "C", "DC", "M", "P", "B", "PH", "D", "EA", "ER", "ED", "EP", "ES", "EV",
            "KL", "R", "SG", "CH", "GS", "GSR", "CHUNK_START", "CHUNK_PART", "CHUNK_END",
        ]),
        body in "[|;,=0-9a-z.-]{0,120}",
    ) {
        let _ = decode(&format!("{tag}|{body}"));
    }

    /// Property: a truncated record never panics and never decodes to a different kind
    #[test]
    fn truncation_is_soft(msg in message(), cut in 0usize..200) {
        let wire = encode(&msg);
        let cut = cut.min(wire.len());
        if wire.is_char_boundary(cut) {
            let decoded = decode(&wire[..cut]);
            if let Some(kind) = decoded.kind() {
                prop_assert_eq!(Some(kind), msg.kind());
            }
        }
    }
}
