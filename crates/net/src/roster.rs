//! Session roster: which peer owns which player slot.

use arena_core::{Color, EntityId, PeerId};
use std::collections::BTreeMap;

/// Per-peer lobby and scoreboard state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSlot {
    /// Owning peer.
    pub peer: PeerId,
    /// Player entity id, assigned by the host.
    pub player_id: EntityId,
    /// Display name.
    pub name: String,
    /// Lobby tint.
    pub color: Color,
    /// Lobby ready flag.
    pub ready: bool,
    /// Hostile kills credited.
    pub kills: u32,
    /// Whether the player is currently alive.
    pub alive: bool,
}

/// All known players, keyed by peer.
#[derive(Debug)]
pub struct PlayerRoster {
    slots: BTreeMap<PeerId, PlayerSlot>,
    next_id: EntityId,
}

impl Default for PlayerRoster {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl PlayerRoster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host side: give `peer` a slot, reusing its id if it already has one.
    ///
    /// Returns the slot id and whether the peer is new.
    pub fn assign(&mut self, peer: &PeerId, name: &str, color: Color) -> (EntityId, bool) {
        if let Some(slot) = self.slots.get_mut(peer) {
            slot.name = name.to_string();
            slot.color = color;
            return (slot.player_id, false);
        }
        let player_id = self.next_id;
        self.next_id += 1;
        self.slots.insert(
            peer.clone(),
            PlayerSlot {
                peer: peer.clone(),
                player_id,
                name: name.to_string(),
                color,
                ready: false,
                kills: 0,
                alive: true,
            },
        );
        (player_id, true)
    }

    /// Client side: record a slot exactly as the host announced it.
    ///
    /// Returns true if the peer was not known before.
    pub fn insert(&mut self, peer: &PeerId, player_id: EntityId, name: &str, color: Color) -> bool {
        self.next_id = self.next_id.max(player_id + 1);
        match self.slots.get_mut(peer) {
            Some(slot) => {
                slot.player_id = player_id;
                slot.name = name.to_string();
                slot.color = color;
                false
            }
            None => {
                self.slots.insert(
                    peer.clone(),
                    PlayerSlot {
                        peer: peer.clone(),
                        player_id,
                        name: name.to_string(),
                        color,
                        ready: false,
                        kills: 0,
                        alive: true,
                    },
                );
                true
            }
        }
    }

    /// Remove a peer.
    pub fn remove(&mut self, peer: &PeerId) -> Option<PlayerSlot> {
        self.slots.remove(peer)
    }

    /// Look a peer up.
    pub fn get(&self, peer: &PeerId) -> Option<&PlayerSlot> {
        self.slots.get(peer)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut PlayerSlot> {
        self.slots.get_mut(peer)
    }

    /// Slot id of `peer`.
    pub fn player_id(&self, peer: &PeerId) -> Option<EntityId> {
        self.slots.get(peer).map(|s| s.player_id)
    }

    /// Peer owning slot `player_id`.
    pub fn peer_for(&self, player_id: EntityId) -> Option<&PeerId> {
        self.slots
            .values()
            .find(|s| s.player_id == player_id)
            .map(|s| &s.peer)
    }

    /// Whether at least one player is present and all are ready.
    pub fn all_ready(&self) -> bool {
        !self.slots.is_empty() && self.slots.values().all(|s| s.ready)
    }

    /// Iterate slots in peer order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerSlot> {
        self.slots.values()
    }

    /// Number of players.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_is_stable_per_peer() {
        let mut roster = PlayerRoster::new();
        let a = PeerId::from("a");
        let b = PeerId::from("b");

        assert_eq!(roster.assign(&a, "Ada", Color::default()), (1, true));
        assert_eq!(roster.assign(&b, "Bo", Color::default()), (2, true));
        assert_eq!(roster.assign(&a, "Ada", Color::default()), (1, false));
        assert_eq!(roster.peer_for(2), Some(&b));
    }

    #[test]
    fn test_all_ready_requires_players() {
        let mut roster = PlayerRoster::new();
        assert!(!roster.all_ready());

        let a = PeerId::from("a");
        roster.insert(&a, 4, "Ada", Color::default());
        assert!(!roster.all_ready());
        roster.get_mut(&a).unwrap().ready = true;
        assert!(roster.all_ready());
    }

    #[test]
    fn test_insert_advances_next_id() {
        let mut roster = PlayerRoster::new();
        roster.insert(&PeerId::from("a"), 7, "Ada", Color::default());
        assert_eq!(roster.assign(&PeerId::from("b"), "Bo", Color::default()), (8, true));
    }
}
