//! Entity identifiers.
//!
//! Players and hostiles live in separate id namespaces. Every cross-reference
//! between replicated objects is an [`EntityKey`] lookup, never a pointer.

use serde::{Deserialize, Serialize};

/// Numeric entity identifier, unique within its [`EntityKind`].
pub type EntityId = u32;

/// Namespace an entity id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    /// A connected peer's avatar.
    Player = 0,
    /// A host-simulated enemy.
    Hostile = 1,
}

impl EntityKind {
    /// Convert to the stable wire representation.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert from the stable wire representation.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Player),
            1 => Some(Self::Hostile),
            _ => None,
        }
    }
}

/// Fully qualified entity address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Namespace.
    pub kind: EntityKind,
    /// Id within the namespace.
    pub id: EntityId,
}

impl EntityKey {
    /// Key for a player slot.
    pub const fn player(id: EntityId) -> Self {
        Self {
            kind: EntityKind::Player,
            id,
        }
    }

    /// Key for a hostile entity.
    pub const fn hostile(id: EntityId) -> Self {
        Self {
            kind: EntityKind::Hostile,
            id,
        }
    }
}

/// Player tint chosen in the lobby.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Build a color from channels.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_u8() {
        for kind in [EntityKind::Player, EntityKind::Hostile] {
            assert_eq!(EntityKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(EntityKind::from_u8(9), None);
    }

    #[test]
    fn keys_order_players_before_hostiles() {
        let mut keys = vec![EntityKey::hostile(1), EntityKey::player(5)];
        keys.sort();
        assert_eq!(keys[0], EntityKey::player(5));
    }
}
