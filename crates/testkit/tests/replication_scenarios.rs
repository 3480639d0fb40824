//! End-to-end replication scenarios over the loopback network.

use arena_core::{EntityKey, GameSettings, PeerId, Vec2};
use arena_net::{LoopbackConfig, ReplicationConfig, ReplicationEvent, SendClass};
use arena_testkit::{Cluster, ClusterConfig, ReplicationMetrics, TestResult};
use proptest::prelude::*;

fn connected(config: ClusterConfig) -> Cluster {
    let mut cluster = Cluster::new(config).expect("cluster builds");
    cluster.connect_all();
    cluster.run(6);
    cluster
}

fn spawn_ring(cluster: &mut Cluster, count: usize) {
    for i in 0..count {
        let angle = i as f32 * 0.4;
        let position = Vec2::new(angle.cos() * 200.0, angle.sin() * 200.0).round();
        cluster
            .host_mut()
            .ctx_mut()
            .spawn_hostile(position, 80.0);
    }
}

#[test]
fn clients_converge_on_a_clean_network() {
    let mut cluster = connected(ClusterConfig::default());
    spawn_ring(&mut cluster, 40);

    let steps = cluster.run_until(60, Cluster::converged);
    assert!(steps.is_some(), "divergence: {:?}", cluster.divergence(0));
    for client in cluster.clients() {
        assert_eq!(client.ctx().roster().len(), 3);
    }
}

#[test]
fn shot_echo_confirms_shooter_and_reaches_others() {
    let mut cluster = connected(ClusterConfig::default());

    let seq = cluster
        .client_mut(0)
        .ctx_mut()
        .fire(Vec2::new(5.0, 5.0), Vec2::new(300.0, 0.0));
    assert_eq!(cluster.client(0).ctx().unconfirmed_shots(), 1);

    cluster.run(3);
    assert_eq!(cluster.client(0).ctx().unconfirmed_shots(), 0);

    let shooter = PeerId::from("client-1");
    let seen_by = |peer: &str| {
        cluster.events().iter().any(|observed| {
            observed.peer == PeerId::from(peer)
                && matches!(
                    &observed.event,
                    ReplicationEvent::BulletFired { shooter: s, seq: q, .. } if *s == shooter && *q == seq
                )
        })
    };
    assert!(seen_by("host"));
    assert!(seen_by("client-2"));
    assert!(!seen_by("client-1"), "shooter must not render its own echo");
}

#[test]
fn duplicated_hit_reports_apply_once() {
    let mut cluster = connected(ClusterConfig {
        network: LoopbackConfig {
            duplicate_rate: 1.0,
            ..LoopbackConfig::default()
        },
        ..ClusterConfig::default()
    });
    let id = cluster
        .host_mut()
        .ctx_mut()
        .spawn_hostile(Vec2::new(10.0, 0.0), 100.0);
    cluster.run(4);

    cluster.client_mut(0).ctx_mut().report_hit(id, 10.0);
    cluster.run(4);

    let key = EntityKey::hostile(id);
    let host_health = cluster.host().ctx().store().get(key).map(|e| e.health);
    assert_eq!(host_health, Some(90.0));
    assert!(cluster.host().ctx().stats().duplicates_suppressed >= 1);
    for client in cluster.clients() {
        let health = client.ctx().store().get(key).map(|e| e.health);
        assert_eq!(health, Some(90.0));
    }
}

#[test]
fn kill_report_removes_hostile_everywhere() {
    let mut cluster = connected(ClusterConfig::default());
    spawn_ring(&mut cluster, 3);
    cluster.run(4);

    cluster.client_mut(1).ctx_mut().report_kill(2);
    cluster.run(4);

    assert!(!cluster.host().ctx().store().contains(EntityKey::hostile(2)));
    for client in cluster.clients() {
        assert!(!client.ctx().store().contains(EntityKey::hostile(2)));
        assert!(client.ctx().store().contains(EntityKey::hostile(1)));
    }
    let kills = cluster
        .host()
        .ctx()
        .roster()
        .get(&PeerId::from("client-2"))
        .map(|slot| slot.kills);
    assert_eq!(kills, Some(1));
}

#[test]
fn validation_list_clears_ghost_after_missed_remove() {
    let mut cluster = connected(ClusterConfig::default());
    spawn_ring(&mut cluster, 3);
    cluster.run(6);
    assert!(cluster.converged());

    let cut_off = PeerId::from("client-1");
    cluster.net().set_connected(&cut_off, false);
    cluster.host_mut().ctx_mut().remove_hostile(2);
    cluster.run(2);
    cluster.net().set_connected(&cut_off, true);

    assert_eq!(cluster.divergence(0).ghosts, vec![2]);
    assert!(cluster.divergence(1).is_empty());

    cluster.host_mut().ctx_mut().send_validation();
    cluster.run(2);
    assert!(cluster.divergence(0).is_empty());
}

#[test]
fn one_shot_send_gives_up_after_attempt_cap() {
    let mut cluster = Cluster::new(ClusterConfig {
        replication: ReplicationConfig {
            max_send_attempts: 5,
            ..ReplicationConfig::default()
        },
        ..ClusterConfig::default()
    })
    .expect("cluster builds");
    cluster.net().set_connected(&PeerId::from("client-1"), false);

    cluster.client_mut(0).ctx_mut().set_ready(true);
    let first = cluster.step();
    assert_eq!(first.clients[0].deferred, 1);

    cluster.run(3);
    assert!(cluster.client(0).ctx().pending().contains(SendClass::ReadyStatus));

    let last = cluster.step();
    assert_eq!(last.clients[0].retry.abandoned, 1);
    assert!(!cluster.client(0).ctx().pending().contains(SendClass::ReadyStatus));
}

#[test]
fn late_joiner_receives_settings_and_start() {
    let mut cluster = Cluster::new(ClusterConfig::default()).expect("cluster builds");
    let settings = GameSettings {
        difficulty: 2.5,
        friendly_fire: true,
        ..GameSettings::default()
    };
    let late = PeerId::from("client-1");
    cluster.net().set_connected(&late, false);
    cluster.host_mut().ctx_mut().connect("Host", Default::default());
    cluster.host_mut().ctx_mut().update_settings(settings.clone());
    cluster.host_mut().ctx_mut().start_game(77);
    cluster.run(2);
    assert!(cluster.client(1).ctx().game_started());
    assert!(!cluster.client(0).ctx().game_started());

    cluster.net().set_connected(&late, true);
    cluster.client_mut(0).ctx_mut().connect("Late", Default::default());
    cluster.run(4);

    let client = cluster.client(0).ctx();
    assert!(client.game_started());
    assert_eq!(client.settings(), &settings);
    assert!(!client.pending().contains(SendClass::Connect));
    assert_eq!(client.roster().len(), 2);
}

#[test]
fn metrics_report_passes_after_convergence() {
    let mut cluster = connected(ClusterConfig {
        clients: 3,
        ..ClusterConfig::default()
    });
    spawn_ring(&mut cluster, 12);
    cluster.run_until(60, Cluster::converged);

    let report = ReplicationMetrics::capture("metrics_after_convergence", &cluster);
    assert_eq!(report.result, TestResult::Pass);
    assert_eq!(report.clients.len(), 3);
    assert!(report.clients.iter().all(|c| c.entities >= 12));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    /// Property: whatever the loss pattern, clients converge once full syncs
    /// start landing
    #[test]
    fn lossy_network_converges(
        seed in any::<u64>(),
        drop_rate in 0.0f64..0.2,
        duplicate_rate in 0.0f64..0.2,
    ) {
        let mut cluster = Cluster::new(ClusterConfig {
            network: LoopbackConfig {
                drop_rate,
                duplicate_rate,
                reorder: true,
                seed,
                ..LoopbackConfig::default()
            },
            replication: ReplicationConfig {
                seed,
                ..ReplicationConfig::default()
            },
            ..ClusterConfig::default()
        })
        .expect("cluster builds");
        cluster.connect_all();
        spawn_ring(&mut cluster, 25);

        let steps = cluster.run_until(2_000, Cluster::converged);
        prop_assert!(steps.is_some(), "divergence: {:?}", cluster.divergence(0));
    }
}
