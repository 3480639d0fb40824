//! Host-side reactions and the host's authority API.
//!
//! The host owns simulation truth. Client reports (moves, shots, hits, kills)
//! are checked against the sender, applied to the store and rebroadcast at
//! once; structural changes also mark the next full sync as due.

use crate::context::ReplicationContext;
use crate::events::ReplicationEvent;
use crate::protocol::Message;
use arena_core::{Color, EntityId, EntityKey, EntityKind, GameSettings, PeerId, Vec2};
use tracing::{debug, info};

/// Health a player spawns with.
pub const PLAYER_MAX_HEALTH: f32 = 100.0;

/// Host reaction to `C`: assign a slot and bring the newcomer up to date.
pub fn on_connect(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Connect {
        peer, name, color, ..
    } = msg
    else {
        return;
    };
    if !owned_by_sender(peer, sender, "C") {
        return;
    }
    let player_id = admit_player(ctx, peer, name, *color);

    // Tell the newcomer about everyone already here.
    let others: Vec<Message> = ctx
        .roster
        .iter()
        .filter(|slot| &slot.peer != peer)
        .map(|slot| Message::Connect {
            peer: slot.peer.clone(),
            name: slot.name.clone(),
            color: slot.color,
            player_id: slot.player_id,
        })
        .collect();
    let ready: Vec<Message> = ctx
        .roster
        .iter()
        .filter(|slot| slot.ready && &slot.peer != peer)
        .map(|slot| Message::Ready {
            peer: slot.peer.clone(),
            ready: true,
        })
        .collect();
    for msg in others.iter().chain(ready.iter()) {
        ctx.send_to(peer, msg);
    }
    let settings = Message::SettingsUpdate(ctx.settings.clone());
    ctx.send_to(peer, &settings);
    if let Some(seed) = ctx.host.game_seed {
        ctx.send_to(peer, &Message::StartGame { seed });
    }
    debug!(%peer, player_id, "newcomer synced");
}

/// Host reaction to `DC`.
pub fn on_disconnect(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Disconnect { peer } = msg else {
        return;
    };
    if owned_by_sender(peer, sender, "DC") {
        ctx.drop_peer(peer);
    }
}

/// Host reaction to `M`: apply and relay.
pub fn on_move(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Move {
        peer,
        position,
        velocity,
    } = msg
    else {
        return;
    };
    if !owned_by_sender(peer, sender, "M") {
        return;
    }
    let Some(player_id) = ctx.roster.player_id(peer) else {
        debug!(%peer, "move from unannounced peer");
        return;
    };
    ctx.apply_player_move(player_id, *position, *velocity);
    ctx.broadcast(msg);
    ctx.push_event(ReplicationEvent::PlayerMoved {
        peer: peer.clone(),
        position: *position,
    });
}

/// Host reaction to `B`: echo to everyone, the shooter included.
pub fn on_bullet(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Bullet {
        shooter,
        seq,
        position,
        velocity,
    } = msg
    else {
        return;
    };
    if !owned_by_sender(shooter, sender, "B") {
        return;
    }
    ctx.broadcast(msg);
    ctx.push_event(ReplicationEvent::BulletFired {
        shooter: shooter.clone(),
        seq: *seq,
        position: *position,
        velocity: *velocity,
    });
}

/// Host reaction to `PH`: a player reports hitting another player.
pub fn on_player_hit(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::PlayerHit {
        target,
        attacker,
        damage,
        ..
    } = msg
    else {
        return;
    };
    if !owned_by_sender(attacker, sender, "PH") {
        return;
    }
    if !ctx.settings.friendly_fire {
        debug!(%attacker, %target, "friendly fire disabled");
        return;
    }
    if let Some(key) = msg.subject_key() {
        if !ctx.accept_once(&key) {
            return;
        }
    }
    ctx.damage_player(target, *damage, attacker);
}

/// Host reaction to `ED`: a client reports a hit on a hostile.
///
/// The reported health is ignored; the host recomputes it from its own store.
pub fn on_entity_damage(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::EntityDamage {
        id,
        shooter,
        damage,
        seq,
        ..
    } = msg
    else {
        return;
    };
    if !owned_by_sender(shooter, sender, "ED") {
        return;
    }
    if let Some(key) = msg.subject_key() {
        if !ctx.accept_once(&key) {
            return;
        }
    }
    ctx.damage_hostile_with_seq(*id, *damage, shooter, *seq);
}

/// Host reaction to `KL`: a client claims a kill.
pub fn on_kill(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Kill { id, killer, seq } = msg else {
        return;
    };
    if !owned_by_sender(killer, sender, "KL") {
        return;
    }
    if let Some(key) = msg.subject_key() {
        if !ctx.accept_once(&key) {
            return;
        }
    }
    ctx.kill_hostile_with_seq(*id, killer, *seq);
}

/// Host reaction to `R`.
pub fn on_ready(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Ready { peer, ready } = msg else {
        return;
    };
    if !owned_by_sender(peer, sender, "R") {
        return;
    }
    let Some(slot) = ctx.roster.get_mut(peer) else {
        debug!(%peer, "ready from unannounced peer");
        return;
    };
    slot.ready = *ready;
    ctx.broadcast(msg);
    ctx.push_event(ReplicationEvent::ReadyChanged {
        peer: peer.clone(),
        ready: *ready,
    });
}

/// Host reaction to `CH`: relay.
pub fn on_chat(ctx: &mut ReplicationContext, msg: &Message, sender: &PeerId) {
    let Message::Chat { peer, text } = msg else {
        return;
    };
    if !owned_by_sender(peer, sender, "CH") {
        return;
    }
    ctx.broadcast(msg);
    ctx.push_event(ReplicationEvent::ChatReceived {
        peer: peer.clone(),
        text: text.clone(),
    });
}

/// Host reaction to `GSR`: answer the requester only.
pub fn on_settings_request(ctx: &mut ReplicationContext, _msg: &Message, sender: &PeerId) {
    let settings = Message::SettingsUpdate(ctx.settings.clone());
    ctx.send_to(sender, &settings);
}

/// Reports about a peer must come from that peer.
fn owned_by_sender(subject: &PeerId, sender: &PeerId, tag: &str) -> bool {
    if subject != sender {
        debug!(%subject, %sender, tag, "ignoring report made on behalf of another peer");
        return false;
    }
    true
}

fn admit_player(ctx: &mut ReplicationContext, peer: &PeerId, name: &str, color: Color) -> EntityId {
    let (player_id, is_new) = ctx.roster.assign(peer, name, color);
    let now = ctx.now();
    if is_new {
        ctx.store
            .upsert(EntityKey::player(player_id), Vec2::ZERO, PLAYER_MAX_HEALTH, now);
        ctx.host.structural_dirty = true;
        info!(%peer, player_id, name, "player joined");
        ctx.push_event(ReplicationEvent::PlayerJoined {
            peer: peer.clone(),
            player_id,
            name: name.to_string(),
            color,
        });
    }
    ctx.broadcast(&Message::Connect {
        peer: peer.clone(),
        name: name.to_string(),
        color,
        player_id,
    });
    player_id
}

impl ReplicationContext {
    /// Register the host's own player and announce it.
    pub fn host_announce(&mut self, name: &str, color: Color) -> EntityId {
        let local = self.local_peer().clone();
        admit_player(self, &local, name, color)
    }

    /// Remove a peer's player, e.g. on `DC` or when the transport reports it gone.
    pub fn drop_peer(&mut self, peer: &PeerId) -> bool {
        let Some(slot) = self.roster.remove(peer) else {
            return false;
        };
        self.store.remove(EntityKey::player(slot.player_id));
        self.client.interpolator.forget(EntityKey::player(slot.player_id));
        info!(%peer, "player left");
        if self.is_host() {
            self.host.structural_dirty = true;
            self.broadcast(&Message::Disconnect { peer: peer.clone() });
        }
        self.push_event(ReplicationEvent::PlayerLeft { peer: peer.clone() });
        true
    }

    pub(crate) fn apply_player_move(
        &mut self,
        player_id: EntityId,
        position: Vec2,
        velocity: Vec2,
    ) {
        let key = EntityKey::player(player_id);
        let now = self.now();
        let health = self
            .store
            .get(key)
            .map(|e| e.health)
            .unwrap_or(PLAYER_MAX_HEALTH);
        self.store.upsert(key, position, health, now);
        self.store.set_velocity(key, velocity);
    }

    /// Spawn a hostile at `position` and announce it.
    pub fn spawn_hostile(&mut self, position: Vec2, health: f32) -> EntityId {
        let id = self.host.next_hostile_id;
        self.host.next_hostile_id += 1;
        let now = self.now();
        self.store.upsert(EntityKey::hostile(id), position, health, now);
        self.host.structural_dirty = true;
        self.broadcast(&Message::EntityAdd {
            id,
            position,
            health,
        });
        self.push_event(ReplicationEvent::HostileSpawned { id });
        id
    }

    /// Move a hostile. Continuous state only; it reaches clients through
    /// incremental sync.
    pub fn move_hostile(&mut self, id: EntityId, position: Vec2, velocity: Vec2) -> bool {
        let key = EntityKey::hostile(id);
        let Some(health) = self.store.get(key).map(|e| e.health) else {
            return false;
        };
        let now = self.now();
        self.store.upsert(key, position, health, now);
        self.store.set_velocity(key, velocity);
        true
    }

    /// Apply `damage` to a hostile on behalf of `shooter`.
    ///
    /// Returns the remaining health, or `None` if the hostile is unknown. A
    /// hostile brought to zero is killed and credited to `shooter`.
    pub fn damage_hostile(&mut self, id: EntityId, damage: f32, shooter: &PeerId) -> Option<f32> {
        let seq = self.next_host_report_seq();
        self.damage_hostile_with_seq(id, damage, shooter, seq)
    }

    pub(crate) fn damage_hostile_with_seq(
        &mut self,
        id: EntityId,
        damage: f32,
        shooter: &PeerId,
        seq: u32,
    ) -> Option<f32> {
        let key = EntityKey::hostile(id);
        let current = self.store.get(key)?.health;
        let health = (current - damage).max(0.0);
        self.store.set_health(key, health);
        self.broadcast(&Message::EntityDamage {
            id,
            shooter: shooter.clone(),
            damage,
            health,
            seq,
        });
        self.push_event(ReplicationEvent::HostileDamaged {
            id,
            health,
            shooter: shooter.clone(),
        });
        if health <= 0.0 {
            self.kill_hostile_with_seq(id, shooter, seq);
        }
        Some(health)
    }

    /// Remove a hostile without a kill.
    pub fn remove_hostile(&mut self, id: EntityId) -> bool {
        if self.store.remove(EntityKey::hostile(id)).is_none() {
            return false;
        }
        self.host.structural_dirty = true;
        self.broadcast(&Message::EntityRemove { id });
        self.push_event(ReplicationEvent::HostileRemoved { id });
        true
    }

    /// Kill a hostile and credit `killer`.
    pub fn kill_hostile(&mut self, id: EntityId, killer: &PeerId) -> bool {
        let seq = self.next_host_report_seq();
        self.kill_hostile_with_seq(id, killer, seq)
    }

    /// Clients dedup `ED`/`K` by subject key, so every hit or kill the host
    /// originates carries its own nonzero sequence.
    fn next_host_report_seq(&mut self) -> u32 {
        self.host.next_report_seq = self.host.next_report_seq.wrapping_add(1).max(1);
        self.host.next_report_seq
    }

    pub(crate) fn kill_hostile_with_seq(
        &mut self,
        id: EntityId,
        killer: &PeerId,
        seq: u32,
    ) -> bool {
        if self.store.remove(EntityKey::hostile(id)).is_none() {
            debug!(id, %killer, "kill for unknown hostile");
            return false;
        }
        if let Some(slot) = self.roster.get_mut(killer) {
            slot.kills += 1;
        }
        self.host.structural_dirty = true;
        self.broadcast(&Message::Kill {
            id,
            killer: killer.clone(),
            seq,
        });
        self.push_event(ReplicationEvent::HostileKilled {
            id,
            killer: killer.clone(),
        });
        true
    }

    /// Apply `damage` to a player; announces the new health and any death.
    pub fn damage_player(
        &mut self,
        target: &PeerId,
        damage: f32,
        attacker: &PeerId,
    ) -> Option<f32> {
        let slot = self.roster.get(target)?;
        if !slot.alive {
            return None;
        }
        let key = EntityKey::player(slot.player_id);
        let entity = self.store.get(key)?;
        let position = entity.position;
        let health = (entity.health - damage).max(0.0);
        self.store.set_health(key, health);

        self.broadcast(&Message::PlayerState {
            peer: target.clone(),
            position,
            health,
        });
        self.push_event(ReplicationEvent::PlayerDamaged {
            peer: target.clone(),
            health,
        });

        if health <= 0.0 {
            if let Some(slot) = self.roster.get_mut(target) {
                slot.alive = false;
            }
            info!(%target, %attacker, "player died");
            self.broadcast(&Message::PlayerDeath {
                peer: target.clone(),
                killer: attacker.clone(),
            });
            self.push_event(ReplicationEvent::PlayerDied {
                peer: target.clone(),
                killer: attacker.clone(),
            });
        }
        Some(health)
    }

    /// Start the match with a shared seed.
    pub fn start_game(&mut self, seed: u64) {
        info!(seed, players = self.roster.len(), "starting game");
        self.host.game_seed = Some(seed);
        self.broadcast(&Message::StartGame { seed });
        self.push_event(ReplicationEvent::GameStarted { seed });
    }

    /// Replace the match settings and push them to every client.
    pub fn update_settings(&mut self, settings: GameSettings) {
        self.settings = settings.clone();
        self.broadcast(&Message::SettingsUpdate(settings.clone()));
        self.push_event(ReplicationEvent::SettingsChanged(settings));
    }

    /// Broadcast the authoritative hostile id list.
    pub fn send_validation(&mut self) {
        let ids = self.store.ids_of(EntityKind::Hostile);
        debug!(count = ids.len(), "sending validation list");
        self.broadcast(&Message::EntityValidate(ids));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::config::ReplicationConfig;
    use crate::pending::Target;

    fn host() -> ReplicationContext {
        let mut ctx = ReplicationContext::new(PeerId::from("h"), ReplicationConfig::default());
        ctx.set_host_peer(Some(PeerId::from("h")));
        ctx
    }

    fn sent(ctx: &mut ReplicationContext) -> Vec<(Target, Message)> {
        ctx.drain_outbox()
            .into_iter()
            .map(|out| (out.target, decode(&out.message)))
            .collect()
    }

    #[test]
    fn test_connect_assigns_slot_and_syncs_newcomer() {
        let mut ctx = host();
        ctx.host_announce("Host", Color::default());
        ctx.drain_outbox();

        let a = PeerId::from("a");
        ctx.dispatch("C|a|Ada|1,2,3|0", &a);

        let out = sent(&mut ctx);
        assert!(out.contains(&(
            Target::Broadcast,
            Message::Connect {
                peer: a.clone(),
                name: "Ada".into(),
                color: Color::rgb(1, 2, 3),
                player_id: 2,
            }
        )));
        assert!(out.iter().any(|(target, msg)| *target == Target::Peer(a.clone())
            && matches!(msg, Message::Connect { peer, player_id: 1, .. } if peer.as_str() == "h")));
        assert!(out
            .iter()
            .any(|(target, msg)| *target == Target::Peer(a.clone())
                && matches!(msg, Message::SettingsUpdate(_))));
        assert!(ctx.store().contains(EntityKey::player(2)));
    }

    #[test]
    fn test_spoofed_connect_is_ignored() {
        let mut ctx = host();
        ctx.dispatch("C|a|Ada|1,2,3|0", &PeerId::from("b"));
        assert!(ctx.roster().is_empty());
        assert_eq!(ctx.outbox_len(), 0);
    }

    #[test]
    fn test_entity_damage_recomputes_health_and_kills() {
        let mut ctx = host();
        let id = ctx.spawn_hostile(Vec2::new(5.0, 5.0), 30.0);
        ctx.drain_outbox();
        let a = PeerId::from("a");

        // Client claims the hostile is already at 1 health; the host ignores that.
        ctx.dispatch(&format!("ED|{id}|a|10|1|1"), &a);
        assert_eq!(ctx.store().get(EntityKey::hostile(id)).unwrap().health, 20.0);

        ctx.dispatch(&format!("ED|{id}|a|25|0|2"), &a);
        assert!(!ctx.store().contains(EntityKey::hostile(id)));
        let out = sent(&mut ctx);
        assert!(out
            .iter()
            .any(|(_, msg)| matches!(msg, Message::Kill { id: killed, .. } if *killed == id)));
    }

    #[test]
    fn test_duplicate_hit_within_window_applied_once() {
        let mut ctx = host();
        let id = ctx.spawn_hostile(Vec2::ZERO, 100.0);
        let a = PeerId::from("a");

        ctx.dispatch(&format!("ED|{id}|a|10|90"), &a);
        ctx.dispatch(&format!("ED|{id}|a|10|90"), &a);
        assert_eq!(ctx.store().get(EntityKey::hostile(id)).unwrap().health, 90.0);
        assert_eq!(ctx.stats().duplicates_suppressed, 1);

        ctx.set_now(arena_core::SimTime::from_millis(1_500));
        ctx.dispatch(&format!("ED|{id}|a|10|80"), &a);
        assert_eq!(ctx.store().get(EntityKey::hostile(id)).unwrap().health, 80.0);
    }

    #[test]
    fn test_structural_changes_mark_full_sync_due() {
        let mut ctx = host();
        assert!(!ctx.host.structural_dirty);
        let id = ctx.spawn_hostile(Vec2::ZERO, 10.0);
        assert!(ctx.host.structural_dirty);

        ctx.host.structural_dirty = false;
        ctx.move_hostile(id, Vec2::ONE, Vec2::ZERO);
        assert!(!ctx.host.structural_dirty);
        ctx.remove_hostile(id);
        assert!(ctx.host.structural_dirty);
    }

    #[test]
    fn test_player_hit_respects_friendly_fire() {
        let mut ctx = host();
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        ctx.dispatch("C|a|Ada|0,0,0|0", &a);
        ctx.dispatch("C|b|Bo|0,0,0|0", &b);

        ctx.dispatch("PH|b|a|150|1", &a);
        assert!(ctx.roster().get(&b).unwrap().alive);

        ctx.update_settings(GameSettings {
            friendly_fire: true,
            ..GameSettings::default()
        });
        ctx.drain_events();
        ctx.dispatch("PH|b|a|150|2", &a);
        assert!(!ctx.roster().get(&b).unwrap().alive);
        let events = ctx.drain_events();
        assert!(events.contains(&ReplicationEvent::PlayerDied {
            peer: b.clone(),
            killer: a.clone(),
        }));
    }

    #[test]
    fn test_authoritative_kinds_from_clients_have_no_effect() {
        let mut ctx = host();
        ctx.dispatch("EA|9|0|0|10", &PeerId::from("a"));
        ctx.dispatch("SG|42", &PeerId::from("a"));
        assert!(ctx.store().is_empty());
        assert!(!ctx.game_started());
    }
}
