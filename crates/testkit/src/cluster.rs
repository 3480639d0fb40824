//! In-process session cluster: one host and N clients over a shared
//! [`LoopbackNetwork`], stepped in lockstep on a simulated clock.

use anyhow::{Context, Result};
use arena_core::{Color, EntityId, EntityKind, PeerId, SimTime};
use arena_net::{
    LoopbackConfig, LoopbackNetwork, LoopbackTransport, PeerSession, ReplicationConfig,
    ReplicationEvent, ReplicationStore, TickReport,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Positions closer than this count as converged.
pub const POSITION_TOLERANCE: f32 = 0.5;

/// Health values closer than this count as converged.
pub const HEALTH_TOLERANCE: f32 = 0.5;

/// Peer id the host is attached under.
pub const HOST_PEER: &str = "host";

/// Session over the loopback network.
pub type LoopbackSession = PeerSession<LoopbackTransport>;

/// Shape of a [`Cluster`].
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of client sessions besides the host.
    pub clients: usize,
    /// Simulated milliseconds per step.
    pub tick_ms: u64,
    /// Loss model shared by every link.
    pub network: LoopbackConfig,
    /// Replication tunables applied to every session.
    pub replication: ReplicationConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            clients: 2,
            tick_ms: 16,
            network: LoopbackConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

/// An event observed by one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEvent {
    /// Clock at the end of the step that produced it.
    pub time: SimTime,
    /// Session that drained it.
    pub peer: PeerId,
    /// The event.
    pub event: ReplicationEvent,
}

/// Per-step tick reports.
#[derive(Debug, Clone, Default)]
pub struct ClusterTick {
    /// Host tick.
    pub host: TickReport,
    /// Client ticks, in client order.
    pub clients: Vec<TickReport>,
}

/// How far a client's hostile table is from the host's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Divergence {
    /// Hostiles the host has and the client lacks (or holds only as a placeholder).
    pub missing: Vec<EntityId>,
    /// Hostiles the client still shows after the host dropped them.
    pub ghosts: Vec<EntityId>,
    /// Hostiles whose position or health is outside tolerance.
    pub stale: Vec<EntityId>,
}

impl Divergence {
    /// Whether the tables agree.
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.ghosts.is_empty() && self.stale.is_empty()
    }

    /// Compare `client` against the authoritative `host` table.
    pub fn between(host: &ReplicationStore, client: &ReplicationStore) -> Self {
        let host_ids: BTreeSet<EntityId> = host.ids_of(EntityKind::Hostile).into_iter().collect();
        let client_ids: BTreeSet<EntityId> =
            client.ids_of(EntityKind::Hostile).into_iter().collect();

        let mut divergence = Divergence {
            ghosts: client_ids.difference(&host_ids).copied().collect(),
            ..Divergence::default()
        };
        for authoritative in host.of_kind(EntityKind::Hostile) {
            match client.get(authoritative.key()) {
                None => divergence.missing.push(authoritative.id),
                Some(replica) if replica.placeholder => divergence.missing.push(authoritative.id),
                Some(replica) => {
                    let drift = replica.position.distance(authoritative.position);
                    let health_gap = (replica.health - authoritative.health).abs();
                    if drift > POSITION_TOLERANCE || health_gap > HEALTH_TOLERANCE {
                        divergence.stale.push(authoritative.id);
                    }
                }
            }
        }
        divergence
    }
}

/// A host plus clients sharing one loopback network.
pub struct Cluster {
    net: LoopbackNetwork,
    host: LoopbackSession,
    clients: Vec<LoopbackSession>,
    now: SimTime,
    tick: Duration,
    events: Vec<ObservedEvent>,
}

impl Cluster {
    /// Attach the host as [`HOST_PEER`] and clients as `client-1`, `client-2`, ...
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let net = LoopbackNetwork::new(config.network.clone());
        let host_peer = PeerId::from(HOST_PEER);
        net.set_host(Some(host_peer.clone()));

        let host = Self::session(&net, host_peer, &config.replication)?;
        let clients = (1..=config.clients)
            .map(|i| Self::session(&net, PeerId::new(format!("client-{i}")), &config.replication))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            net,
            host,
            clients,
            now: SimTime::ZERO,
            tick: Duration::from_millis(config.tick_ms.max(1)),
            events: Vec::new(),
        })
    }

    fn session(
        net: &LoopbackNetwork,
        peer: PeerId,
        replication: &ReplicationConfig,
    ) -> Result<LoopbackSession> {
        let transport = net
            .attach(peer.clone())
            .with_context(|| format!("attaching {peer}"))?;
        // Each session gets its own chunk-id stream.
        let mut config = replication.clone();
        config.seed ^= fnv(peer.as_str());
        PeerSession::new(transport, config)
    }

    /// Shared network handle, for loss and reachability changes.
    pub fn net(&self) -> &LoopbackNetwork {
        &self.net
    }

    /// Current simulated clock.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Host session.
    pub fn host(&self) -> &LoopbackSession {
        &self.host
    }

    /// Mutable host session.
    pub fn host_mut(&mut self) -> &mut LoopbackSession {
        &mut self.host
    }

    /// Client `index` (zero-based).
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn client(&self, index: usize) -> &LoopbackSession {
        &self.clients[index]
    }

    /// Mutable client `index` (zero-based).
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn client_mut(&mut self, index: usize) -> &mut LoopbackSession {
        &mut self.clients[index]
    }

    /// All client sessions.
    pub fn clients(&self) -> &[LoopbackSession] {
        &self.clients
    }

    /// Every event drained so far.
    pub fn events(&self) -> &[ObservedEvent] {
        &self.events
    }

    /// Take the event log.
    pub fn drain_events(&mut self) -> Vec<ObservedEvent> {
        std::mem::take(&mut self.events)
    }

    /// Announce every peer: the host registers itself, clients send `C`.
    pub fn connect_all(&mut self) {
        self.host.ctx_mut().connect("Host", Color::rgb(255, 215, 0));
        for (i, client) in self.clients.iter_mut().enumerate() {
            let shade = (40 * (i + 1)).min(255) as u8;
            client
                .ctx_mut()
                .connect(&format!("Player {}", i + 1), Color::rgb(shade, 128, 255 - shade));
        }
    }

    /// Advance the clock one tick. Clients tick before the host so their
    /// reports are handled within the same step.
    pub fn step(&mut self) -> ClusterTick {
        self.now = self.now.advance(self.tick);
        let now = self.now;

        let clients = self
            .clients
            .iter_mut()
            .map(|client| client.tick(now))
            .collect();
        let host = self.host.tick(now);

        for session in std::iter::once(&mut self.host).chain(self.clients.iter_mut()) {
            let peer = session.local_peer().clone();
            for event in session.drain_events() {
                self.events.push(ObservedEvent {
                    time: now,
                    peer: peer.clone(),
                    event,
                });
            }
        }

        ClusterTick { host, clients }
    }

    /// Step `ticks` times.
    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Step until `done` holds, at most `max_ticks` times. Returns the number
    /// of steps taken, or `None` if the limit was reached first.
    pub fn run_until<F>(&mut self, max_ticks: usize, mut done: F) -> Option<usize>
    where
        F: FnMut(&Cluster) -> bool,
    {
        for step in 0..=max_ticks {
            if done(self) {
                debug!(step, "cluster condition met");
                return Some(step);
            }
            if step < max_ticks {
                self.step();
            }
        }
        None
    }

    /// Divergence of client `index` from the host.
    pub fn divergence(&self, index: usize) -> Divergence {
        Divergence::between(self.host.ctx().store(), self.clients[index].ctx().store())
    }

    /// Whether every client's hostile table matches the host's.
    pub fn converged(&self) -> bool {
        (0..self.clients.len()).all(|i| self.divergence(i).is_empty())
    }
}

fn fnv(value: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in value.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
