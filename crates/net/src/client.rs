//! Client-side reactions and the local player's outbound API.
//!
//! Clients apply whatever the host says, smooth remote motion through the
//! interpolator and recognize echoes of their own actions. The outbound API
//! works for both roles: on the host it applies the action directly.

use crate::context::ReplicationContext;
use crate::entity_replication::{UpsertOutcome, HEALTH_EPSILON};
use crate::events::ReplicationEvent;
use crate::host::PLAYER_MAX_HEALTH;
use crate::pending::SendClass;
use crate::protocol::{EntityStateRecord, Message};
use crate::validation::{reconcile_entity_list, ValidationReport};
use arena_core::{Color, EntityId, EntityKey, EntityKind, PeerId, Vec2};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Non-authoritative kinds a client still only accepts from the host, since
/// the host is the only peer that relays them.
fn relayed_by_host(ctx: &mut ReplicationContext, sender: &PeerId, tag: &str) -> bool {
    if ctx.is_from_host(sender) {
        return true;
    }
    debug!(%sender, tag, "ignoring relay from non-host peer");
    ctx.stats.unauthorized += 1;
    false
}

/// Client reaction to `C`: record the slot the host assigned.
pub fn on_connect(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Connect {
        peer,
        name,
        color,
        player_id,
    } = msg
    else {
        return;
    };
    if !relayed_by_host(ctx, sender, "C") || *player_id == 0 {
        return;
    }
    let is_new = ctx.roster.insert(peer, *player_id, name, *color);
    let now = ctx.now();
    let key = EntityKey::player(*player_id);
    if !ctx.store.contains(key) {
        ctx.store.upsert(key, Vec2::ZERO, PLAYER_MAX_HEALTH, now);
    }
    if peer == ctx.local_peer() {
        info!(player_id, "joined as player");
        ctx.pending.cancel(SendClass::Connect);
    }
    if is_new {
        ctx.push_event(ReplicationEvent::PlayerJoined {
            peer: peer.clone(),
            player_id: *player_id,
            name: name.clone(),
            color: *color,
        });
    }
}

/// Client reaction to `DC`.
pub fn on_disconnect(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Disconnect { peer } = msg else {
        return;
    };
    if relayed_by_host(ctx, sender, "DC") {
        ctx.drop_peer(peer);
    }
}

/// Client reaction to `M`. Own echoes are ignored.
pub fn on_move(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::Move {
        peer,
        position,
        velocity,
    } = msg
    else {
        return;
    };
    if peer == ctx.local_peer() {
        return;
    }
    let Some(player_id) = ctx.roster.player_id(peer) else {
        return;
    };
    let key = EntityKey::player(player_id);
    ctx.glide_to(key, *position);
    ctx.apply_player_move(player_id, *position, *velocity);
    ctx.push_event(ReplicationEvent::PlayerMoved {
        peer: peer.clone(),
        position: *position,
    });
}

/// Client reaction to `P`: host correction of position and health.
pub fn on_player_state(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::PlayerState {
        peer,
        position,
        health,
    } = msg
    else {
        return;
    };
    let Some(player_id) = ctx.roster.player_id(peer) else {
        return;
    };
    let key = EntityKey::player(player_id);
    let now = ctx.now();
    let previous = ctx.store.get(key).map(|e| e.health);
    if peer == ctx.local_peer() {
        ctx.client.interpolator.snap(key, *position, now);
    } else {
        ctx.glide_to(key, *position);
    }
    ctx.store.upsert(key, *position, *health, now);
    ctx.store.set_health(key, *health);
    if previous.map_or(true, |p| (p - health).abs() >= HEALTH_EPSILON) {
        ctx.push_event(ReplicationEvent::PlayerDamaged {
            peer: peer.clone(),
            health: *health,
        });
    }
}

/// Client reaction to `B`. The echo of a shot we already rendered is dropped.
pub fn on_bullet(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::Bullet {
        shooter,
        seq,
        position,
        velocity,
    } = msg
    else {
        return;
    };
    if shooter == ctx.local_peer() {
        ctx.client.shots.confirm(*seq);
        return;
    }
    ctx.push_event(ReplicationEvent::BulletFired {
        shooter: shooter.clone(),
        seq: *seq,
        position: *position,
        velocity: *velocity,
    });
}

/// Client reaction to `D`; overrides any local prediction.
pub fn on_player_death(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::PlayerDeath { peer, killer } = msg else {
        return;
    };
    if let Some(slot) = ctx.roster.get_mut(peer) {
        slot.alive = false;
        let key = EntityKey::player(slot.player_id);
        ctx.store.set_health(key, 0.0);
    }
    ctx.push_event(ReplicationEvent::PlayerDied {
        peer: peer.clone(),
        killer: killer.clone(),
    });
}

/// Client reaction to `EA`.
pub fn on_entity_add(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::EntityAdd {
        id,
        position,
        health,
    } = msg
    else {
        return;
    };
    ctx.apply_hostile(*id, *position, Vec2::ZERO, *health);
}

/// Client reaction to `ER`.
pub fn on_entity_remove(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::EntityRemove { id } = msg else {
        return;
    };
    let key = EntityKey::hostile(*id);
    ctx.client.interpolator.forget(key);
    if ctx.store.remove(key).is_some() {
        ctx.push_event(ReplicationEvent::HostileRemoved { id: *id });
    }
}

/// Client reaction to `ED`: the host's health value wins.
pub fn on_entity_damage(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::EntityDamage {
        id,
        shooter,
        health,
        ..
    } = msg
    else {
        return;
    };
    if !relayed_by_host(ctx, sender, "ED") {
        return;
    }
    if let Some(key) = msg.subject_key() {
        if !ctx.accept_once(&key) {
            return;
        }
    }
    let key = EntityKey::hostile(*id);
    let now = ctx.now();
    if ctx.store.set_health(key, *health).is_none() {
        // Damage for an entity we never saw; keep it until a position arrives.
        ctx.store.insert_placeholder(key, now);
        ctx.store.set_health(key, *health);
    }
    ctx.push_event(ReplicationEvent::HostileDamaged {
        id: *id,
        health: *health,
        shooter: shooter.clone(),
    });
}

/// Client reaction to `EP`: glide known hostiles, spawn unknown ones.
pub fn on_entity_positions(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::EntityPositions(records) = msg else {
        return;
    };
    for record in records {
        ctx.apply_hostile(record.id, record.position, record.velocity, record.health);
    }
}

/// Client reaction to `ES`: apply every record, then validate each namespace
/// against the ids the host listed.
pub fn on_entity_state(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::EntityState(records) = msg else {
        return;
    };
    for record in records {
        ctx.apply_state_record(record);
    }
    let now = ctx.now();
    for kind in [EntityKind::Player, EntityKind::Hostile] {
        let ids: BTreeSet<EntityId> = records
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.id)
            .collect();
        let report = reconcile_entity_list(&mut ctx.store, kind, &ids, now);
        ctx.after_validation(kind, &report);
    }
}

/// Client reaction to `EV`.
pub fn on_entity_validate(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::EntityValidate(ids) = msg else {
        return;
    };
    let ids: BTreeSet<EntityId> = ids.iter().copied().collect();
    let now = ctx.now();
    let report = reconcile_entity_list(&mut ctx.store, EntityKind::Hostile, &ids, now);
    ctx.after_validation(EntityKind::Hostile, &report);
}

/// Client reaction to `KL`.
pub fn on_kill(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Kill { id, killer, .. } = msg else {
        return;
    };
    if !relayed_by_host(ctx, sender, "KL") {
        return;
    }
    if let Some(key) = msg.subject_key() {
        if !ctx.accept_once(&key) {
            return;
        }
    }
    let key = EntityKey::hostile(*id);
    ctx.store.remove(key);
    ctx.client.interpolator.forget(key);
    if let Some(slot) = ctx.roster.get_mut(killer) {
        slot.kills += 1;
    }
    ctx.push_event(ReplicationEvent::HostileKilled {
        id: *id,
        killer: killer.clone(),
    });
}

/// Client reaction to `R`.
pub fn on_ready(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Ready { peer, ready } = msg else {
        return;
    };
    if !relayed_by_host(ctx, sender, "R") {
        return;
    }
    if let Some(slot) = ctx.roster.get_mut(peer) {
        slot.ready = *ready;
    }
    if peer == ctx.local_peer() {
        ctx.pending.cancel(SendClass::ReadyStatus);
        return;
    }
    ctx.push_event(ReplicationEvent::ReadyChanged {
        peer: peer.clone(),
        ready: *ready,
    });
}

/// Client reaction to `SG`.
pub fn on_start_game(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::StartGame { seed } = msg else {
        return;
    };
    if ctx.client.game_started {
        return;
    }
    info!(seed, "game started by host");
    ctx.client.game_started = true;
    ctx.push_event(ReplicationEvent::GameStarted { seed: *seed });
}

/// Client reaction to `CH`. Own echoes are ignored.
pub fn on_chat(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::Chat { peer, text } = msg else {
        return;
    };
    if peer == ctx.local_peer() {
        return;
    }
    ctx.push_event(ReplicationEvent::ChatReceived {
        peer: peer.clone(),
        text: text.clone(),
    });
}

/// Client reaction to `GS`.
pub fn on_settings_update(ctx: &mut ReplicationContext, msg: &Message, _sender: &PeerId) {
    let Message::SettingsUpdate(settings) = msg else {
        return;
    };
    ctx.pending.cancel(SendClass::SettingsRequest);
    if &ctx.settings == settings {
        return;
    }
    ctx.settings = settings.clone();
    ctx.push_event(ReplicationEvent::SettingsChanged(settings.clone()));
}

impl ReplicationContext {
    /// Retarget the interpolator at `position`, starting from whatever is
    /// displayed now. Entities without a track are snapped.
    fn glide_to(&mut self, key: EntityKey, position: Vec2) {
        let now = self.now();
        match self.store.get(key) {
            Some(entity) if !entity.placeholder => {
                let fallback = entity.position;
                self.client
                    .interpolator
                    .retarget(key, position, fallback, now);
            }
            _ => self.client.interpolator.snap(key, position, now),
        }
    }

    fn apply_hostile(&mut self, id: EntityId, position: Vec2, velocity: Vec2, health: f32) {
        let key = EntityKey::hostile(id);
        let now = self.now();
        self.glide_to(key, position);
        let outcome = self.store.upsert(key, position, health, now);
        self.store.set_velocity(key, velocity);
        if outcome == UpsertOutcome::Created {
            self.push_event(ReplicationEvent::HostileSpawned { id });
        }
    }

    fn apply_state_record(&mut self, record: &EntityStateRecord) {
        let key = EntityKey {
            kind: record.kind,
            id: record.id,
        };
        match record.kind {
            EntityKind::Hostile => {
                let velocity = self.store.get(key).map(|e| e.velocity).unwrap_or_default();
                self.apply_hostile(record.id, record.position, velocity, record.health);
            }
            EntityKind::Player => {
                let own = self.roster.player_id(self.local_peer()) == Some(record.id);
                let now = self.now();
                let position = if own {
                    // Our own position is ours to predict; take only health.
                    self.store
                        .get(key)
                        .map(|e| e.position)
                        .unwrap_or(record.position)
                } else {
                    self.glide_to(key, record.position);
                    record.position
                };
                self.store.upsert(key, position, record.health, now);
            }
        }
    }

    fn after_validation(&mut self, kind: EntityKind, report: &ValidationReport) {
        if report.is_noop() {
            return;
        }
        debug!(
            ?kind,
            ghosts = report.ghosts_removed.len(),
            missing = report.placeholders_added.len(),
            "entity list reconciled"
        );
        for &id in &report.ghosts_removed {
            let key = EntityKey { kind, id };
            self.client.interpolator.forget(key);
            if kind == EntityKind::Hostile {
                self.push_event(ReplicationEvent::HostileRemoved { id });
            }
        }
    }

    fn next_report_seq(&mut self) -> u32 {
        self.client.next_report_seq = self.client.next_report_seq.wrapping_add(1).max(1);
        self.client.next_report_seq
    }

    /// Announce the local player. On the host this registers it directly.
    pub fn connect(&mut self, name: &str, color: Color) {
        let msg = Message::connect(self.local_peer().clone(), name, color);
        if self.is_host() {
            if let Message::Connect { name, color, .. } = msg {
                self.host_announce(&name, color);
            }
            return;
        }
        self.send_to_host(&msg, Some(SendClass::Connect));
    }

    /// Report the local player's movement.
    pub fn send_move(&mut self, position: Vec2, velocity: Vec2) {
        if let Some(player_id) = self.roster.player_id(self.local_peer()) {
            self.apply_player_move(player_id, position, velocity);
        }
        let msg = Message::Move {
            peer: self.local_peer().clone(),
            position,
            velocity,
        };
        if self.is_host() {
            self.broadcast(&msg);
        } else {
            self.send_to_host(&msg, None);
        }
    }

    /// Fire a shot the caller has already rendered. Returns its sequence.
    pub fn fire(&mut self, position: Vec2, velocity: Vec2) -> u32 {
        let seq = if self.is_host() {
            self.host.next_shot_seq = self.host.next_shot_seq.wrapping_add(1).max(1);
            self.host.next_shot_seq
        } else {
            self.client.shots.predict()
        };
        let msg = Message::Bullet {
            shooter: self.local_peer().clone(),
            seq,
            position,
            velocity,
        };
        if self.is_host() {
            self.broadcast(&msg);
        } else {
            self.send_to_host(&msg, None);
        }
        seq
    }

    /// Report a hit on a hostile. Clients predict the new health locally
    /// until the host's `ED` overrides it.
    pub fn report_hit(&mut self, id: EntityId, damage: f32) {
        let shooter = self.local_peer().clone();
        if self.is_host() {
            self.damage_hostile(id, damage, &shooter);
            return;
        }
        let key = EntityKey::hostile(id);
        let Some(current) = self.store.get(key).map(|e| e.health) else {
            debug!(id, "hit on unknown hostile");
            return;
        };
        let predicted = (current - damage).max(0.0);
        self.store.set_health(key, predicted);
        let seq = self.next_report_seq();
        self.send_to_host(
            &Message::EntityDamage {
                id,
                shooter,
                damage,
                health: predicted,
                seq,
            },
            None,
        );
    }

    /// Report a hostile kill.
    pub fn report_kill(&mut self, id: EntityId) {
        let killer = self.local_peer().clone();
        if self.is_host() {
            self.kill_hostile(id, &killer);
            return;
        }
        let seq = self.next_report_seq();
        self.send_to_host(&Message::Kill { id, killer, seq }, None);
    }

    /// Report hitting another player.
    pub fn report_player_hit(&mut self, target: &PeerId, damage: f32) {
        let attacker = self.local_peer().clone();
        if self.is_host() {
            if self.settings.friendly_fire {
                self.damage_player(target, damage, &attacker);
            }
            return;
        }
        let seq = self.next_report_seq();
        self.send_to_host(
            &Message::PlayerHit {
                target: target.clone(),
                attacker,
                damage,
                seq,
            },
            None,
        );
    }

    /// Toggle the local lobby ready flag.
    pub fn set_ready(&mut self, ready: bool) {
        let peer = self.local_peer().clone();
        if let Some(slot) = self.roster.get_mut(&peer) {
            slot.ready = ready;
        }
        let msg = Message::Ready { peer, ready };
        if self.is_host() {
            self.broadcast(&msg);
        } else {
            self.send_to_host(&msg, Some(SendClass::ReadyStatus));
        }
    }

    /// Ask the host for its current settings.
    pub fn request_settings(&mut self) {
        if self.is_host() {
            return;
        }
        let msg = Message::SettingsRequest {
            peer: self.local_peer().clone(),
        };
        self.send_to_host(&msg, Some(SendClass::SettingsRequest));
    }

    /// Send a chat line.
    pub fn chat(&mut self, text: &str) {
        let msg = Message::chat(self.local_peer().clone(), text);
        if self.is_host() {
            self.broadcast(&msg);
        } else {
            self.send_to_host(&msg, None);
        }
    }
}
