//! Tag → {decoder, host reaction, client reaction} dispatch tables.
//!
//! The tables are keyed by [`MessageKind`] and filled by an exhaustive match,
//! so adding a message kind without deciding how each role reacts to it does
//! not compile.

use crate::codec::{decode_body, split_tag, ENTRY_DELIM, VALUE_DELIM};
use crate::context::ReplicationContext;
use crate::protocol::{Message, MessageKind};
use crate::{client, codec, host};
use arena_core::PeerId;
use std::collections::HashMap;
use tracing::trace;

/// Decodes the body of a record (everything after `TAG|`).
pub type Decoder = fn(MessageKind, &str) -> Option<Message>;

/// Reaction run for a decoded message. The third argument is the sender.
pub type Reaction = fn(&mut ReplicationContext, &Message, &PeerId);

/// How a tag is decoded.
#[derive(Debug, Clone, Copy)]
pub struct MessageDescriptor {
    /// Wire tag.
    pub tag: &'static str,
    /// Kind the tag decodes to.
    pub kind: MessageKind,
    /// Body decoder.
    pub decode: Decoder,
}

impl MessageDescriptor {
    /// Descriptor using the stock codec for `kind`.
    pub fn standard(kind: MessageKind) -> Self {
        Self {
            tag: kind.tag(),
            kind,
            decode: decode_body,
        }
    }
}

/// Registry of every message kind the local peer understands.
#[derive(Default)]
pub struct MessageRegistry {
    descriptors: HashMap<&'static str, MessageDescriptor>,
    host_reactions: HashMap<MessageKind, Reaction>,
    client_reactions: HashMap<MessageKind, Reaction>,
}

impl MessageRegistry {
    /// Empty registry; every record decodes to [`Message::Unknown`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind wired to its reactions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in MessageKind::ALL {
            let (host, client) = default_reactions(kind);
            registry.register(MessageDescriptor::standard(kind), host, client);
        }
        registry
    }

    /// Register a tag. Registering a tag again replaces the earlier entry.
    pub fn register(
        &mut self,
        descriptor: MessageDescriptor,
        host: Option<Reaction>,
        client: Option<Reaction>,
    ) {
        let kind = descriptor.kind;
        if self.descriptors.insert(descriptor.tag, descriptor).is_some() {
            trace!(tag = descriptor.tag, "replacing registered descriptor");
        }
        match host {
            Some(reaction) => self.host_reactions.insert(kind, reaction),
            None => self.host_reactions.remove(&kind),
        };
        match client {
            Some(reaction) => self.client_reactions.insert(kind, reaction),
            None => self.client_reactions.remove(&kind),
        };
    }

    /// Decode a record through its tag's descriptor.
    pub fn decode(&self, raw: &str) -> Message {
        split_tag(raw)
            .and_then(|(tag, body)| {
                let descriptor = self.descriptors.get(tag)?;
                (descriptor.decode)(descriptor.kind, body)
            })
            .unwrap_or_else(|| Message::Unknown(raw.to_string()))
    }

    /// Whether `tag` is registered.
    pub fn contains_tag(&self, tag: &str) -> bool {
        self.descriptors.contains_key(tag)
    }

    /// Reaction run when the local peer is host.
    pub fn host_reaction(&self, kind: MessageKind) -> Option<Reaction> {
        self.host_reactions.get(&kind).copied()
    }

    /// Reaction run when the local peer is a client.
    pub fn client_reaction(&self, kind: MessageKind) -> Option<Reaction> {
        self.client_reactions.get(&kind).copied()
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Hash of the registered tag set.
    ///
    /// Peers built with different message tables log different hashes, which
    /// makes protocol mismatches visible at startup.
    pub fn schema_hash(&self) -> String {
        let mut tags: Vec<&str> = self.descriptors.keys().copied().collect();
        tags.sort_unstable();
        let mut hasher = blake3::Hasher::new();
        for tag in tags {
            hasher.update(tag.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex()[..16].to_string()
    }
}

fn default_reactions(kind: MessageKind) -> (Option<Reaction>, Option<Reaction>) {
    use MessageKind::*;
    match kind {
        Connect => (Some(host::on_connect), Some(client::on_connect)),
        Disconnect => (Some(host::on_disconnect), Some(client::on_disconnect)),
        Move => (Some(host::on_move), Some(client::on_move)),
        PlayerState => (None, Some(client::on_player_state)),
        Bullet => (Some(host::on_bullet), Some(client::on_bullet)),
        PlayerHit => (Some(host::on_player_hit), None),
        PlayerDeath => (None, Some(client::on_player_death)),
        EntityAdd => (None, Some(client::on_entity_add)),
        EntityRemove => (None, Some(client::on_entity_remove)),
        EntityDamage => (Some(host::on_entity_damage), Some(client::on_entity_damage)),
        EntityPositions => (None, Some(client::on_entity_positions)),
        EntityState => (None, Some(client::on_entity_state)),
        EntityValidate => (None, Some(client::on_entity_validate)),
        Kill => (Some(host::on_kill), Some(client::on_kill)),
        Ready => (Some(host::on_ready), Some(client::on_ready)),
        StartGame => (None, Some(client::on_start_game)),
        Chat => (Some(host::on_chat), Some(client::on_chat)),
        SettingsUpdate => (None, Some(client::on_settings_update)),
        SettingsRequest => (Some(host::on_settings_request), None),
        // Reassembly happens in dispatch before role routing.
        ChunkStart | ChunkPart | ChunkEnd => (None, None),
    }
}

/// Best-effort reinterpretation of a record no descriptor understood.
///
/// Garbled tags are common when a chunk stream is cut short. If every entry
/// of the record is numeric and every entry has the arity of an `EP` (6
/// values) or `ES` (5 values) entry, the record is decoded as that batch.
pub fn recover_unknown(raw: &str) -> Option<Message> {
    // Drop whatever precedes the first field delimiter: it is either a
    // damaged tag or a fragment of one.
    let body = raw
        .split_once(codec::FIELD_DELIM)
        .map(|(_, rest)| rest)
        .unwrap_or(raw)
        .trim();
    if body.is_empty() || body.contains(codec::FIELD_DELIM) {
        return None;
    }

    let entries: Vec<&str> = body
        .split(ENTRY_DELIM)
        .filter(|e| !e.trim().is_empty())
        .collect();
    if entries.is_empty() {
        return None;
    }
    let all_numeric = entries.iter().all(|entry| {
        entry
            .split(VALUE_DELIM)
            .all(|v| v.trim().parse::<f64>().is_ok())
    });
    if !all_numeric {
        return None;
    }

    let arity = entries[0].split(VALUE_DELIM).count();
    if entries
        .iter()
        .any(|entry| entry.split(VALUE_DELIM).count() != arity)
    {
        return None;
    }
    let kind = match arity {
        6 => MessageKind::EntityPositions,
        5 => MessageKind::EntityState,
        _ => return None,
    };
    let message = decode_body(kind, body)?;
    let empty = match &message {
        Message::EntityPositions(records) => records.is_empty(),
        Message::EntityState(records) => records.is_empty(),
        _ => true,
    };
    (!empty).then_some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;

    #[test]
    fn test_defaults_cover_every_tag() {
        let registry = MessageRegistry::with_defaults();
        assert_eq!(registry.len(), MessageKind::ALL.len());
        for kind in MessageKind::ALL {
            assert!(registry.contains_tag(kind.tag()), "{kind:?}");
        }
    }

    #[test]
    fn test_host_has_no_reaction_to_authoritative_kinds() {
        let registry = MessageRegistry::with_defaults();
        for kind in MessageKind::ALL {
            if kind.is_host_authoritative() {
                assert!(registry.host_reaction(kind).is_none(), "{kind:?}");
            }
        }
    }

    #[test]
    fn test_empty_registry_decodes_unknown() {
        let registry = MessageRegistry::new();
        assert_eq!(
            registry.decode("ER|4"),
            Message::Unknown("ER|4".to_string())
        );
    }

    fn count_chat(ctx: &mut ReplicationContext, _msg: &Message, _sender: &PeerId) {
        ctx.push_event(crate::events::ReplicationEvent::ChatReceived {
            peer: PeerId::from("hooked"),
            text: String::new(),
        });
    }

    #[test]
    fn test_register_replaces_reaction() {
        let mut registry = MessageRegistry::with_defaults();
        registry.register(
            MessageDescriptor::standard(MessageKind::Chat),
            Some(count_chat),
            Some(count_chat),
        );
        assert_eq!(registry.len(), MessageKind::ALL.len());

        let mut ctx = ReplicationContext::with_registry(
            PeerId::from("c"),
            ReplicationConfig::default(),
            registry,
        );
        ctx.set_host_peer(Some(PeerId::from("h")));
        ctx.dispatch("CH|x|hello", &PeerId::from("h"));
        let events = ctx.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            crate::events::ReplicationEvent::ChatReceived { peer, .. } if peer.as_str() == "hooked"
        ));
    }

    #[test]
    fn test_schema_hash_tracks_tag_set() {
        let full = MessageRegistry::with_defaults();
        assert_eq!(full.schema_hash(), MessageRegistry::with_defaults().schema_hash());

        let mut partial = MessageRegistry::new();
        partial.register(MessageDescriptor::standard(MessageKind::Chat), None, None);
        assert_ne!(full.schema_hash(), partial.schema_hash());
    }

    #[test]
    fn test_recover_state_batch_with_damaged_tag() {
        match recover_unknown("S|1,1,1,2,30;4,1,0.5,0,10") {
            Some(Message::EntityState(records)) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[1].id, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_recover_position_batch_without_tag() {
        assert!(matches!(
            recover_unknown("1,1,1,0,0,10;2,5,5,0,0,20"),
            Some(Message::EntityPositions(records)) if records.len() == 2
        ));
    }

    #[test]
    fn test_recover_rejects_text_and_mixed_arity() {
        assert_eq!(recover_unknown("hello world"), None);
        assert_eq!(recover_unknown("X|1,2,3,4,5;1,2,3"), None);
        assert_eq!(recover_unknown("X|1|2"), None);
        assert_eq!(recover_unknown(""), None);
    }
}
