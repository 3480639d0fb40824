//! Gameplay-facing events produced by message reactions.
//!
//! Reactions never call into game code. They push events here and the owning
//! system drains them once per tick.

use arena_core::{Color, EntityId, GameSettings, PeerId, Vec2};

/// Something the game should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// A peer entered the roster.
    PlayerJoined {
        /// Joining peer.
        peer: PeerId,
        /// Assigned slot.
        player_id: EntityId,
        /// Display name.
        name: String,
        /// Lobby tint.
        color: Color,
    },
    /// A peer left the roster.
    PlayerLeft {
        /// Departing peer.
        peer: PeerId,
    },
    /// A remote player moved.
    PlayerMoved {
        /// Moving peer.
        peer: PeerId,
        /// New position.
        position: Vec2,
    },
    /// A remote shot to render.
    BulletFired {
        /// Firing peer.
        shooter: PeerId,
        /// Shot sequence.
        seq: u32,
        /// Muzzle position.
        position: Vec2,
        /// Bullet velocity.
        velocity: Vec2,
    },
    /// A hostile appeared.
    HostileSpawned {
        /// Hostile id.
        id: EntityId,
    },
    /// A hostile's authoritative health changed.
    HostileDamaged {
        /// Hostile id.
        id: EntityId,
        /// Remaining health.
        health: f32,
        /// Peer whose shot landed.
        shooter: PeerId,
    },
    /// A hostile disappeared without a kill.
    HostileRemoved {
        /// Hostile id.
        id: EntityId,
    },
    /// A hostile was killed.
    HostileKilled {
        /// Hostile id.
        id: EntityId,
        /// Credited peer.
        killer: PeerId,
    },
    /// A player's authoritative health changed.
    PlayerDamaged {
        /// Damaged peer.
        peer: PeerId,
        /// Remaining health.
        health: f32,
    },
    /// A player died.
    PlayerDied {
        /// Dead peer.
        peer: PeerId,
        /// Killer.
        killer: PeerId,
    },
    /// A lobby ready toggle.
    ReadyChanged {
        /// Toggling peer.
        peer: PeerId,
        /// New state.
        ready: bool,
    },
    /// The host started the match.
    GameStarted {
        /// Shared seed.
        seed: u64,
    },
    /// A chat line from another peer.
    ChatReceived {
        /// Speaking peer.
        peer: PeerId,
        /// Text.
        text: String,
    },
    /// New match settings are in effect.
    SettingsChanged(GameSettings),
}
