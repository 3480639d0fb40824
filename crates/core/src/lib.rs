#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod entity;
pub mod settings;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// Re-export commonly used types
pub use entity::{Color, EntityId, EntityKey, EntityKind};
pub use glam::Vec2;
pub use settings::{GameSettings, SettingsError};

/// Monotonic session time in milliseconds since the session started.
///
/// Every timer in the replication layer reads this instead of `Instant` so
/// ticks can be replayed deterministically in tests.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTime(pub u64);

impl SimTime {
    /// Session start.
    pub const ZERO: Self = Self(0);

    /// Build from whole milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Build from fractional seconds.
    pub fn from_secs_f32(secs: f32) -> Self {
        Self((secs.max(0.0) * 1000.0).round() as u64)
    }

    /// Milliseconds since session start.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Advance by `delta`.
    pub fn advance(self, delta: Duration) -> Self {
        Self(self.0 + delta.as_millis() as u64)
    }

    /// Time elapsed since `earlier`, saturating at zero.
    pub fn since(self, earlier: SimTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Opaque peer identity supplied by the session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which side of the session the local peer is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Authoritative peer.
    Host,
    /// Any non-host peer.
    Client,
}

impl Role {
    /// Resolve the role from the local identity and the session's host identity.
    pub fn resolve(local: &PeerId, host: Option<&PeerId>) -> Self {
        match host {
            Some(host) if host == local => Role::Host,
            _ => Role::Client,
        }
    }
}

/// Helper to derive a reproducible RNG seeded by session + peer domains.
pub fn scoped_rng(session_seed: u64, domain: &str) -> StdRng {
    // FNV-1a keeps the domain hash stable across platforms and builds.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in domain.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    StdRng::seed_from_u64(session_seed ^ hash)
}
