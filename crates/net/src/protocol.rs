//! Protocol message definitions for host/client replication.
//!
//! Every message is a variant of [`Message`]; its fieldless discriminant
//! [`MessageKind`] carries the wire tag and keys the registry tables.

use arena_core::{Color, EntityId, EntityKind, GameSettings, PeerId, Vec2};

/// Default transport payload ceiling in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 900;

/// Maximum length of a chat message (characters).
pub const MAX_CHAT_LEN: usize = 256;

/// Maximum length of a player display name (characters).
pub const MAX_NAME_LEN: usize = 32;

/// Discriminant of [`Message`], one per wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// `C`
    Connect,
    /// `DC`
    Disconnect,
    /// `M`
    Move,
    /// `P`
    PlayerState,
    /// `B`
    Bullet,
    /// `PH`
    PlayerHit,
    /// `D`
    PlayerDeath,
    /// `EA`
    EntityAdd,
    /// `ER`
    EntityRemove,
    /// `ED`
    EntityDamage,
    /// `EP`
    EntityPositions,
    /// `ES`
    EntityState,
    /// `EV`
    EntityValidate,
    /// `KL`
    Kill,
    /// `R`
    Ready,
    /// `SG`
    StartGame,
    /// `CH`
    Chat,
    /// `GS`
    SettingsUpdate,
    /// `GSR`
    SettingsRequest,
    /// `CHUNK_START`
    ChunkStart,
    /// `CHUNK_PART`
    ChunkPart,
    /// `CHUNK_END`
    ChunkEnd,
}

impl MessageKind {
    /// Every kind, in tag-table order.
    pub const ALL: [MessageKind; 22] = [
        MessageKind::Connect,
        MessageKind::Disconnect,
        MessageKind::Move,
        MessageKind::PlayerState,
        MessageKind::Bullet,
        MessageKind::PlayerHit,
        MessageKind::PlayerDeath,
        MessageKind::EntityAdd,
        MessageKind::EntityRemove,
        MessageKind::EntityDamage,
        MessageKind::EntityPositions,
        MessageKind::EntityState,
        MessageKind::EntityValidate,
        MessageKind::Kill,
        MessageKind::Ready,
        MessageKind::StartGame,
        MessageKind::Chat,
        MessageKind::SettingsUpdate,
        MessageKind::SettingsRequest,
        MessageKind::ChunkStart,
        MessageKind::ChunkPart,
        MessageKind::ChunkEnd,
    ];

    /// Wire tag for this kind.
    pub const fn tag(self) -> &'static str {
        match self {
            MessageKind::Connect => "C",
            MessageKind::Disconnect => "DC",
            MessageKind::Move => "M",
            MessageKind::PlayerState => "P",
            MessageKind::Bullet => "B",
            MessageKind::PlayerHit => "PH",
            MessageKind::PlayerDeath => "D",
            MessageKind::EntityAdd => "EA",
            MessageKind::EntityRemove => "ER",
            MessageKind::EntityDamage => "ED",
            MessageKind::EntityPositions => "EP",
            MessageKind::EntityState => "ES",
            MessageKind::EntityValidate => "EV",
            MessageKind::Kill => "KL",
            MessageKind::Ready => "R",
            MessageKind::StartGame => "SG",
            MessageKind::Chat => "CH",
            MessageKind::SettingsUpdate => "GS",
            MessageKind::SettingsRequest => "GSR",
            MessageKind::ChunkStart => "CHUNK_START",
            MessageKind::ChunkPart => "CHUNK_PART",
            MessageKind::ChunkEnd => "CHUNK_END",
        }
    }

    /// Look a kind up by wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Kinds that only the host may originate.
    pub const fn is_host_authoritative(self) -> bool {
        matches!(
            self,
            MessageKind::PlayerState
                | MessageKind::PlayerDeath
                | MessageKind::EntityAdd
                | MessageKind::EntityRemove
                | MessageKind::EntityPositions
                | MessageKind::EntityState
                | MessageKind::EntityValidate
                | MessageKind::StartGame
                | MessageKind::SettingsUpdate
        )
    }
}

/// One entry of an incremental `EP` batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityPositionRecord {
    /// Hostile id.
    pub id: EntityId,
    /// World position.
    pub position: Vec2,
    /// Velocity in units per second.
    pub velocity: Vec2,
    /// Current health.
    pub health: f32,
}

/// One entry of a full `ES` sync.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityStateRecord {
    /// Entity id.
    pub id: EntityId,
    /// Namespace of `id`.
    pub kind: EntityKind,
    /// World position.
    pub position: Vec2,
    /// Current health.
    pub health: f32,
}

/// A decoded replication message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A peer announces itself; the host echoes it with the assigned slot.
    Connect {
        /// Announcing peer.
        peer: PeerId,
        /// Display name.
        name: String,
        /// Lobby tint.
        color: Color,
        /// Player slot assigned by the host, 0 when unassigned.
        player_id: EntityId,
    },
    /// A peer left the session.
    Disconnect {
        /// Departing peer.
        peer: PeerId,
    },
    /// Owner-reported movement of a player.
    Move {
        /// Moving peer.
        peer: PeerId,
        /// Position.
        position: Vec2,
        /// Velocity.
        velocity: Vec2,
    },
    /// Host correction of a player's position and health.
    PlayerState {
        /// Corrected peer.
        peer: PeerId,
        /// Position.
        position: Vec2,
        /// Authoritative health.
        health: f32,
    },
    /// A shot fired by `shooter`.
    Bullet {
        /// Firing peer.
        shooter: PeerId,
        /// Per-shooter shot sequence.
        seq: u32,
        /// Muzzle position.
        position: Vec2,
        /// Bullet velocity.
        velocity: Vec2,
    },
    /// A player hit another player.
    PlayerHit {
        /// Damaged peer.
        target: PeerId,
        /// Attacking peer.
        attacker: PeerId,
        /// Damage dealt.
        damage: f32,
        /// Per-attacker sequence, 0 when absent.
        seq: u32,
    },
    /// A player died.
    PlayerDeath {
        /// Dead peer.
        peer: PeerId,
        /// Killer peer (or the dead peer for environment deaths).
        killer: PeerId,
    },
    /// Host spawned a hostile.
    EntityAdd {
        /// Hostile id.
        id: EntityId,
        /// Spawn position.
        position: Vec2,
        /// Starting health.
        health: f32,
    },
    /// Host removed a hostile.
    EntityRemove {
        /// Hostile id.
        id: EntityId,
    },
    /// A hostile took damage. `health` is authoritative when sent by the host.
    EntityDamage {
        /// Hostile id.
        id: EntityId,
        /// Peer whose shot landed.
        shooter: PeerId,
        /// Damage dealt.
        damage: f32,
        /// Remaining health after the hit.
        health: f32,
        /// Per-shooter sequence, 0 when absent.
        seq: u32,
    },
    /// Incremental, priority-ordered hostile positions.
    EntityPositions(Vec<EntityPositionRecord>),
    /// Full state of every live entity.
    EntityState(Vec<EntityStateRecord>),
    /// Authoritative hostile id list.
    EntityValidate(Vec<EntityId>),
    /// A hostile was killed.
    Kill {
        /// Hostile id.
        id: EntityId,
        /// Credited peer.
        killer: PeerId,
        /// Per-killer sequence, 0 when absent.
        seq: u32,
    },
    /// Lobby ready toggle.
    Ready {
        /// Toggling peer.
        peer: PeerId,
        /// New state.
        ready: bool,
    },
    /// Host starts the match.
    StartGame {
        /// Shared simulation seed.
        seed: u64,
    },
    /// Chat line.
    Chat {
        /// Speaking peer.
        peer: PeerId,
        /// Sanitized text.
        text: String,
    },
    /// Host pushes match settings.
    SettingsUpdate(GameSettings),
    /// A client asks for the current settings.
    SettingsRequest {
        /// Requesting peer.
        peer: PeerId,
    },
    /// First record of a chunked message.
    ChunkStart {
        /// Tag of the chunked message.
        kind_tag: String,
        /// Declared number of parts.
        total: usize,
        /// Stream id.
        chunk_id: String,
    },
    /// One slice of a chunked message.
    ChunkPart {
        /// Stream id.
        chunk_id: String,
        /// Slot index.
        index: usize,
        /// Raw slice.
        data: String,
    },
    /// Last record of a chunked message.
    ChunkEnd {
        /// Stream id.
        chunk_id: String,
    },
    /// Undecodable input, kept verbatim for recovery.
    Unknown(String),
}

impl Message {
    /// Discriminant, `None` for [`Message::Unknown`].
    pub fn kind(&self) -> Option<MessageKind> {
        let kind = match self {
            Message::Connect { .. } => MessageKind::Connect,
            Message::Disconnect { .. } => MessageKind::Disconnect,
            Message::Move { .. } => MessageKind::Move,
            Message::PlayerState { .. } => MessageKind::PlayerState,
            Message::Bullet { .. } => MessageKind::Bullet,
            Message::PlayerHit { .. } => MessageKind::PlayerHit,
            Message::PlayerDeath { .. } => MessageKind::PlayerDeath,
            Message::EntityAdd { .. } => MessageKind::EntityAdd,
            Message::EntityRemove { .. } => MessageKind::EntityRemove,
            Message::EntityDamage { .. } => MessageKind::EntityDamage,
            Message::EntityPositions(_) => MessageKind::EntityPositions,
            Message::EntityState(_) => MessageKind::EntityState,
            Message::EntityValidate(_) => MessageKind::EntityValidate,
            Message::Kill { .. } => MessageKind::Kill,
            Message::Ready { .. } => MessageKind::Ready,
            Message::StartGame { .. } => MessageKind::StartGame,
            Message::Chat { .. } => MessageKind::Chat,
            Message::SettingsUpdate(_) => MessageKind::SettingsUpdate,
            Message::SettingsRequest { .. } => MessageKind::SettingsRequest,
            Message::ChunkStart { .. } => MessageKind::ChunkStart,
            Message::ChunkPart { .. } => MessageKind::ChunkPart,
            Message::ChunkEnd { .. } => MessageKind::ChunkEnd,
            Message::Unknown(_) => return None,
        };
        Some(kind)
    }

    /// Dedup subject key for hit/kill events.
    pub fn subject_key(&self) -> Option<String> {
        let (subject, source, seq) = match self {
            Message::EntityDamage {
                id, shooter, seq, ..
            } => (id.to_string(), shooter.as_str(), *seq),
            Message::Kill { id, killer, seq } => (format!("kill{id}"), killer.as_str(), *seq),
            Message::PlayerHit {
                target,
                attacker,
                seq,
                ..
            } => (format!("hit{target}"), attacker.as_str(), *seq),
            _ => return None,
        };
        Some(if seq > 0 {
            format!("{subject}_{source}_{seq}")
        } else {
            format!("{subject}_{source}")
        })
    }

    /// Build a chat message with sanitized, length-capped text.
    pub fn chat(peer: PeerId, text: &str) -> Self {
        let text: String = crate::codec::sanitize_text(text)
            .chars()
            .take(MAX_CHAT_LEN)
            .collect();
        Message::Chat { peer, text }
    }

    /// Build a connect announcement with a sanitized name.
    pub fn connect(peer: PeerId, name: &str, color: Color) -> Self {
        let name: String = crate::codec::sanitize_text(name)
            .chars()
            .take(MAX_NAME_LEN)
            .collect();
        Message::Connect {
            peer,
            name,
            color,
            player_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tags_are_unique() {
        let tags: HashSet<_> = MessageKind::ALL.iter().map(|k| k.tag()).collect();
        assert_eq!(tags.len(), MessageKind::ALL.len());
    }

    #[test]
    fn from_tag_inverts_tag() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MessageKind::from_tag("NOPE"), None);
    }

    #[test]
    fn subject_key_includes_sequence_when_present() {
        let hit = Message::EntityDamage {
            id: 7,
            shooter: PeerId::from("p1"),
            damage: 10.0,
            health: 90.0,
            seq: 0,
        };
        assert_eq!(hit.subject_key().as_deref(), Some("7_p1"));

        let hit = Message::EntityDamage {
            id: 7,
            shooter: PeerId::from("p1"),
            damage: 10.0,
            health: 90.0,
            seq: 3,
        };
        assert_eq!(hit.subject_key().as_deref(), Some("7_p1_3"));
    }

    #[test]
    fn kill_and_damage_keys_do_not_collide() {
        let kill = Message::Kill {
            id: 7,
            killer: PeerId::from("p1"),
            seq: 0,
        };
        assert_eq!(kill.subject_key().as_deref(), Some("kill7_p1"));
    }

    #[test]
    fn player_hit_and_damage_keys_do_not_collide_with_numeric_peers() {
        let damage = Message::EntityDamage {
            id: 7656,
            shooter: PeerId::from("42"),
            damage: 10.0,
            health: 90.0,
            seq: 1,
        };
        let hit = Message::PlayerHit {
            target: PeerId::from("7656"),
            attacker: PeerId::from("42"),
            damage: 10.0,
            seq: 1,
        };
        assert_eq!(damage.subject_key().as_deref(), Some("7656_42_1"));
        assert_eq!(hit.subject_key().as_deref(), Some("hit7656_42_1"));
    }

    #[test]
    fn chat_text_is_sanitized() {
        let msg = Message::chat(PeerId::from("p"), "hi|there;you,ok");
        match msg {
            Message::Chat { text, .. } => assert_eq!(text, "hi there you ok"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
