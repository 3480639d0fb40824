use crate::config::SimConfig;
use anyhow::{Context, Result};
use arena_core::{scoped_rng, EntityKey, EntityKind, Vec2};
use arena_testkit::{
    Cluster, ClusterConfig, JsonlSink, MetricsSink, ReplicationMetrics, TestResult,
};
use rand::rngs::StdRng;
use rand::Rng;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub struct HeadlessConfig {
    pub sim: SimConfig,
    pub metrics: Option<PathBuf>,
    pub events: Option<PathBuf>,
}

/// Run a full host + clients match on the loopback network and report how
/// far the clients ended up from the host.
pub fn run(cfg: HeadlessConfig) -> Result<ReplicationMetrics> {
    let sim = &cfg.sim;
    let mut cluster = Cluster::new(ClusterConfig {
        clients: sim.clients,
        tick_ms: sim.tick_ms,
        network: sim.network.loopback(sim.seed),
        replication: sim.replication.clone(),
    })
    .context("failed to build session cluster")?;
    let mut events = match &cfg.events {
        Some(path) => Some(
            JsonlSink::create(path)
                .with_context(|| format!("failed to create event log {}", path.display()))?,
        ),
        None => None,
    };
    let mut rng = scoped_rng(sim.seed, "headless");

    lobby(&mut cluster, sim);
    info!(
        clients = sim.clients,
        players = cluster.host().ctx().roster().len(),
        "lobby complete"
    );

    for tick in 0..sim.ticks {
        steer_hostiles(&mut cluster, sim);
        top_up_hostiles(&mut cluster, sim, &mut rng);
        move_players(&mut cluster, sim, tick);
        if sim.fire_every_ticks > 0 && tick % sim.fire_every_ticks == 0 {
            fire_volley(&mut cluster, sim, &mut rng);
        }
        if sim.validation_every_ticks > 0 && tick % sim.validation_every_ticks == 0 {
            cluster.host_mut().ctx_mut().send_validation();
        }
        cluster.step();
        if let Some(sink) = events.as_mut() {
            sink.write_all(&cluster.drain_events())?;
        }
    }

    // Freeze the arena and heal the network so the next full sync lands.
    cluster.net().set_loss(0.0, 0.0);
    for (position, id) in hostile_positions(&cluster) {
        cluster
            .host_mut()
            .ctx_mut()
            .move_hostile(id, position, Vec2::ZERO);
    }
    let settled = cluster.run_until(sim.settle_ticks, Cluster::converged);
    match settled {
        Some(steps) => info!(steps, "clients converged"),
        None => warn!(ticks = sim.settle_ticks, "clients did not converge"),
    }

    if let Some(sink) = events.as_mut() {
        sink.write_all(&cluster.drain_events())?;
        sink.flush()?;
        debug!(lines = sink.lines(), "event log written");
    }

    let report = ReplicationMetrics::capture("headless", &cluster);
    if let Some(path) = &cfg.metrics {
        MetricsSink::create(path)?.write(&report)?;
    }
    if report.result == TestResult::Fail {
        warn!("replication diverged; see metrics for per-client counts");
    }
    Ok(report)
}

fn lobby(cluster: &mut Cluster, sim: &SimConfig) {
    cluster.connect_all();
    cluster
        .host_mut()
        .ctx_mut()
        .update_settings(sim.settings.clone());
    for i in 0..sim.clients {
        cluster.client_mut(i).ctx_mut().set_ready(true);
    }
    cluster.run_until(120, |c| {
        c.host().ctx().roster().len() == sim.clients + 1
            && c.host().ctx().roster().iter().filter(|s| s.ready).count() == sim.clients
    });
    cluster.host_mut().ctx_mut().start_game(sim.seed);
}

fn hostile_positions(cluster: &Cluster) -> Vec<(Vec2, u32)> {
    cluster
        .host()
        .ctx()
        .store()
        .of_kind(EntityKind::Hostile)
        .map(|e| (e.position, e.id))
        .collect()
}

fn player_positions(cluster: &Cluster) -> Vec<Vec2> {
    cluster
        .host()
        .ctx()
        .store()
        .of_kind(EntityKind::Player)
        .filter(|e| e.health > 0.0)
        .map(|e| e.position)
        .collect()
}

/// Walk every hostile toward its nearest living player.
fn steer_hostiles(cluster: &mut Cluster, sim: &SimConfig) {
    let players = player_positions(cluster);
    if players.is_empty() {
        return;
    }
    let step = sim.settings.hostile_speed * sim.tick_ms as f32 / 1000.0;
    for (position, id) in hostile_positions(cluster) {
        let target = players
            .iter()
            .copied()
            .min_by(|a, b| a.distance(position).total_cmp(&b.distance(position)))
            .unwrap_or(position);
        let heading = (target - position).normalize_or_zero();
        let velocity = heading * sim.settings.hostile_speed;
        cluster
            .host_mut()
            .ctx_mut()
            .move_hostile(id, position + heading * step, velocity);
    }
}

fn top_up_hostiles(cluster: &mut Cluster, sim: &SimConfig, rng: &mut StdRng) {
    let alive = cluster.host().ctx().store().ids_of(EntityKind::Hostile).len();
    let cap = sim.hostiles.min(sim.settings.max_hostiles as usize);
    for _ in alive..cap {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let position = Vec2::new(angle.cos(), angle.sin()) * sim.arena_radius;
        cluster
            .host_mut()
            .ctx_mut()
            .spawn_hostile(position, sim.hostile_health);
    }
}

/// Players orbit the arena center, one lane each.
fn move_players(cluster: &mut Cluster, sim: &SimConfig, tick: u64) {
    let t = tick as f32 * sim.tick_ms as f32 / 1000.0;
    for i in 0..sim.clients {
        let radius = 60.0 + 40.0 * i as f32;
        let angle = t * 0.8 + i as f32;
        let position = Vec2::new(angle.cos(), angle.sin()) * radius;
        let velocity = Vec2::new(-angle.sin(), angle.cos()) * radius * 0.8;
        cluster
            .client_mut(i)
            .ctx_mut()
            .send_move(position, velocity);
    }
}

/// Every client shoots at the hostile nearest to it and reports the hit.
fn fire_volley(cluster: &mut Cluster, sim: &SimConfig, rng: &mut StdRng) {
    for i in 0..sim.clients {
        let ctx = cluster.client(i).ctx();
        let Some(me) = ctx.roster().player_id(ctx.local_peer()) else {
            continue;
        };
        let Some(origin) = ctx
            .store()
            .get(EntityKey::player(me))
            .map(|e| e.position)
        else {
            continue;
        };
        let nearest = ctx
            .store()
            .of_kind(EntityKind::Hostile)
            .filter(|e| !e.placeholder && e.health > 0.0)
            .min_by(|a, b| {
                a.position
                    .distance(origin)
                    .total_cmp(&b.position.distance(origin))
            })
            .map(|e| (e.id, e.position));
        let Some((target, aim)) = nearest else {
            continue;
        };

        let ctx = cluster.client_mut(i).ctx_mut();
        let velocity = (aim - origin).normalize_or_zero() * 600.0;
        ctx.fire(origin, velocity);
        if rng.gen_bool(0.7) {
            ctx.report_hit(target, sim.shot_damage);
        }
        if i == 0 && rng.gen_bool(0.05) {
            ctx.chat("nice shot");
        }
    }
}
