//! Replication state store: last-known-good state per entity.
//!
//! Uses a BTreeMap so iteration order is deterministic, which keeps priority
//! ties and full-sync output stable across peers.

use arena_core::{EntityId, EntityKey, EntityKind, SimTime, Vec2};
use std::collections::BTreeMap;

/// Health changes smaller than this are treated as jitter.
pub const HEALTH_EPSILON: f32 = 0.01;

/// Replicated state of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedEntity {
    /// Id within `kind`'s namespace.
    pub id: EntityId,
    /// Namespace.
    pub kind: EntityKind,
    /// Last known position.
    pub position: Vec2,
    /// Last known velocity.
    pub velocity: Vec2,
    /// Last known health.
    pub health: f32,
    /// When this entity last received an update.
    pub last_synced_at: SimTime,
    /// Created since the last incremental sync cycle.
    pub recently_added: bool,
    /// Created from an id list and still waiting for its first position.
    pub placeholder: bool,
}

impl ReplicatedEntity {
    /// Store key of this entity.
    pub fn key(&self) -> EntityKey {
        EntityKey {
            kind: self.kind,
            id: self.id,
        }
    }
}

/// What an [`ReplicationStore::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The id was unknown and has been created.
    Created,
    /// Position or health changed.
    Updated,
    /// Nothing changed beyond jitter.
    Unchanged,
}

/// Entity table addressed by [`EntityKey`].
#[derive(Debug, Default)]
pub struct ReplicationStore {
    entities: BTreeMap<EntityKey, ReplicatedEntity>,
}

impl ReplicationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update an entity.
    ///
    /// New entities are flagged `recently_added` until the next
    /// [`clear_recently_added`](Self::clear_recently_added).
    pub fn upsert(
        &mut self,
        key: EntityKey,
        position: Vec2,
        health: f32,
        now: SimTime,
    ) -> UpsertOutcome {
        match self.entities.get_mut(&key) {
            Some(entity) => {
                let mut changed = false;
                if entity.position != position {
                    entity.position = position;
                    changed = true;
                }
                if (entity.health - health).abs() >= HEALTH_EPSILON {
                    entity.health = health;
                    changed = true;
                }
                entity.last_synced_at = now;
                entity.placeholder = false;
                if changed {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            None => {
                self.entities.insert(
                    key,
                    ReplicatedEntity {
                        id: key.id,
                        kind: key.kind,
                        position,
                        velocity: Vec2::ZERO,
                        health,
                        last_synced_at: now,
                        recently_added: true,
                        placeholder: false,
                    },
                );
                UpsertOutcome::Created
            }
        }
    }

    /// Insert a placeholder for an id known only from an authoritative list.
    ///
    /// Returns false if the entity already exists.
    pub fn insert_placeholder(&mut self, key: EntityKey, now: SimTime) -> bool {
        if self.entities.contains_key(&key) {
            return false;
        }
        self.entities.insert(
            key,
            ReplicatedEntity {
                id: key.id,
                kind: key.kind,
                position: Vec2::ZERO,
                velocity: Vec2::ZERO,
                health: 0.0,
                last_synced_at: now,
                recently_added: true,
                placeholder: true,
            },
        );
        true
    }

    /// Update the velocity of an existing entity.
    pub fn set_velocity(&mut self, key: EntityKey, velocity: Vec2) {
        if let Some(entity) = self.entities.get_mut(&key) {
            entity.velocity = velocity;
        }
    }

    /// Overwrite health without jitter coalescing; returns the previous value.
    pub fn set_health(&mut self, key: EntityKey, health: f32) -> Option<f32> {
        let entity = self.entities.get_mut(&key)?;
        let previous = entity.health;
        entity.health = health;
        Some(previous)
    }

    /// Remove an entity.
    pub fn remove(&mut self, key: EntityKey) -> Option<ReplicatedEntity> {
        self.entities.remove(&key)
    }

    /// Look an entity up.
    pub fn get(&self, key: EntityKey) -> Option<&ReplicatedEntity> {
        self.entities.get(&key)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: EntityKey) -> bool {
        self.entities.contains_key(&key)
    }

    /// Iterate all entities in key order.
    pub fn all(&self) -> impl Iterator<Item = &ReplicatedEntity> {
        self.entities.values()
    }

    /// Iterate the entities of one namespace.
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &ReplicatedEntity> {
        self.entities.values().filter(move |e| e.kind == kind)
    }

    /// Ids present in one namespace.
    pub fn ids_of(&self, kind: EntityKind) -> Vec<EntityId> {
        self.of_kind(kind).map(|e| e.id).collect()
    }

    /// End the "recently added" boost for every entity.
    pub fn clear_recently_added(&mut self) {
        for entity in self.entities.values_mut() {
            entity.recently_added = false;
        }
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
