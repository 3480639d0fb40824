//! Host-side periodic synchronization.
//!
//! Incremental sync sends a small, priority-ordered batch of hostile positions
//! every few tens of milliseconds. Full sync sends every live entity every few
//! seconds, or sooner after a structural change, to correct sampling drift.

use crate::codec::encode;
use crate::config::SyncConfig;
use crate::context::ReplicationContext;
use crate::entity_replication::{ReplicatedEntity, ReplicationStore};
use crate::pending::SendClass;
use crate::protocol::{EntityPositionRecord, EntityStateRecord, Message};
use arena_core::{EntityId, EntityKind, SimTime, Vec2};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use tracing::debug;

/// Boost for entities created since the last incremental cycle.
pub const RECENTLY_ADDED_BOOST: f32 = 1.5;

/// Boost for entities left out of the previous batch.
pub const STARVED_BOOST: f32 = 1.2;

/// Heap entry; higher priority first, lower id on ties.
#[derive(Debug, Clone, Copy)]
struct SyncPriority {
    priority: f32,
    record: EntityPositionRecord,
}

impl Ord for SyncPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.record.id.cmp(&self.record.id))
    }
}

impl PartialOrd for SyncPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SyncPriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SyncPriority {}

/// Priority of one entity: closer to a player is higher, new and starved
/// entities are boosted.
pub fn priority(
    entity: &ReplicatedEntity,
    players: &[Vec2],
    previous_batch: &BTreeSet<EntityId>,
) -> f32 {
    let distance = players
        .iter()
        .map(|p| p.distance(entity.position))
        .fold(f32::INFINITY, f32::min);
    let mut score = 1.0 / (1.0 + distance);
    if entity.recently_added {
        score *= RECENTLY_ADDED_BOOST;
    }
    if !previous_batch.contains(&entity.id) {
        score *= STARVED_BOOST;
    }
    score
}

/// Pick at most `max_batch` hostiles in descending priority.
pub fn select_batch(
    store: &ReplicationStore,
    players: &[Vec2],
    previous_batch: &BTreeSet<EntityId>,
    max_batch: usize,
) -> Vec<EntityPositionRecord> {
    let mut heap: BinaryHeap<SyncPriority> = store
        .of_kind(EntityKind::Hostile)
        .filter(|e| !e.placeholder)
        .map(|e| SyncPriority {
            priority: priority(e, players, previous_batch),
            record: EntityPositionRecord {
                id: e.id,
                position: e.position,
                velocity: e.velocity,
                health: e.health,
            },
        })
        .collect();

    let mut batch = Vec::with_capacity(max_batch.min(heap.len()));
    while batch.len() < max_batch {
        match heap.pop() {
            Some(entry) => batch.push(entry.record),
            None => break,
        }
    }
    batch
}

/// Halve `records` until its encoded `EP` fits `ceiling`, or one remains.
///
/// Returns the number of records kept and the encoded message.
pub fn fit_batch(records: &[EntityPositionRecord], ceiling: usize) -> (usize, String) {
    let mut n = records.len();
    loop {
        let wire = encode(&Message::EntityPositions(records[..n].to_vec()));
        if wire.len() <= ceiling || n <= 1 {
            return (n, wire);
        }
        n /= 2;
    }
}

/// What one [`HostSynchronizer::run`] sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entities in the incremental batch, if one went out.
    pub incremental: Option<usize>,
    /// Entities in the full sync, if one went out.
    pub full: Option<usize>,
}

/// Running totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetrics {
    /// Incremental batches sent.
    pub incremental_batches: u64,
    /// Entity records across all incremental batches.
    pub entities_sent: u64,
    /// Batches that had to be halved to fit the ceiling.
    pub batches_shrunk: u64,
    /// Full syncs sent.
    pub full_syncs: u64,
    /// Full syncs brought forward by a structural change.
    pub forced_full_syncs: u64,
}

/// Timers and bookkeeping for the host's periodic sends.
#[derive(Debug)]
pub struct HostSynchronizer {
    config: SyncConfig,
    last_incremental: Option<SimTime>,
    last_full: Option<SimTime>,
    previous_batch: BTreeSet<EntityId>,
    metrics: SyncMetrics,
}

impl HostSynchronizer {
    /// Create a synchronizer; the first run sends both kinds of sync.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            last_incremental: None,
            last_full: None,
            previous_batch: BTreeSet::new(),
            metrics: SyncMetrics::default(),
        }
    }

    /// Totals so far.
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Ids sent in the last incremental batch.
    pub fn previous_batch(&self) -> &BTreeSet<EntityId> {
        &self.previous_batch
    }

    /// Run whichever timers are due. Does nothing unless the local peer is host.
    pub fn run(&mut self, ctx: &mut ReplicationContext) -> SyncReport {
        if !ctx.is_host() {
            return SyncReport::default();
        }
        let now = ctx.now();
        let mut report = SyncReport::default();

        if is_due(self.last_incremental, now, self.config.incremental_interval()) {
            report.incremental = self.incremental(ctx);
            self.last_incremental = Some(now);
        }

        let periodic = is_due(self.last_full, now, self.config.full_interval());
        let forced = ctx.host.structural_dirty
            && is_due(self.last_full, now, self.config.full_min_interval());
        if periodic || forced {
            if forced && !periodic {
                self.metrics.forced_full_syncs += 1;
            }
            report.full = Some(self.full(ctx));
            self.last_full = Some(now);
        }
        report
    }

    fn incremental(&mut self, ctx: &mut ReplicationContext) -> Option<usize> {
        let players: Vec<Vec2> = ctx
            .store
            .of_kind(EntityKind::Player)
            .filter(|e| e.health > 0.0)
            .map(|e| e.position)
            .collect();
        let batch = select_batch(
            &ctx.store,
            &players,
            &self.previous_batch,
            self.config.max_batch,
        );
        ctx.store.clear_recently_added();
        if batch.is_empty() {
            return None;
        }

        let (n, wire) = fit_batch(&batch, ctx.chunker.ceiling());
        if n < batch.len() {
            self.metrics.batches_shrunk += 1;
            debug!(selected = batch.len(), sent = n, "incremental batch shrunk to fit");
        }
        self.previous_batch = batch[..n].iter().map(|r| r.id).collect();
        self.metrics.incremental_batches += 1;
        self.metrics.entities_sent += n as u64;
        ctx.queue_wire(wire);
        Some(n)
    }

    fn full(&mut self, ctx: &mut ReplicationContext) -> usize {
        let records: Vec<EntityStateRecord> = ctx
            .store
            .all()
            .filter(|e| !e.placeholder)
            .map(|e| EntityStateRecord {
                id: e.id,
                kind: e.kind,
                position: e.position,
                health: e.health,
            })
            .collect();
        let count = records.len();
        debug!(count, dirty = ctx.host.structural_dirty, "full sync");
        ctx.broadcast_with_class(&Message::EntityState(records), SendClass::FullSync);
        ctx.host.structural_dirty = false;
        self.metrics.full_syncs += 1;
        count
    }
}

fn is_due(last: Option<SimTime>, now: SimTime, interval: std::time::Duration) -> bool {
    last.map_or(true, |last| now.since(last) >= interval)
}
