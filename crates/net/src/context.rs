//! Per-peer replication state and the dispatch entry point.
//!
//! One [`ReplicationContext`] owns everything a peer's reactions touch: the
//! registry, chunk table, dedup window, entity store, roster and the outbound
//! queue. It is driven from a single thread; nothing in it is shared.

use crate::chunking::{ChunkEndOutcome, ChunkTable, Chunker};
use crate::codec::encode;
use crate::config::ReplicationConfig;
use crate::dedup::DedupWindow;
use crate::entity_replication::ReplicationStore;
use crate::events::ReplicationEvent;
use crate::pending::{PendingSends, SendClass, Target};
use crate::prediction::{EntityInterpolator, ShotPredictor};
use crate::protocol::{Message, MessageKind};
use crate::registry::{recover_unknown, MessageRegistry};
use crate::roster::PlayerRoster;
use arena_core::{scoped_rng, EntityId, GameSettings, PeerId, Role, SimTime};
use tracing::{debug, trace, warn};

/// Nested chunk streams deeper than this are dropped.
const MAX_DISPATCH_DEPTH: u8 = 4;

/// A logical record waiting for the session to hand it to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Destination.
    pub target: Target,
    /// Logical wire record; chunked at flush time if oversize.
    pub message: String,
    /// Retry slot to use if the send fails; `None` is fire-and-forget.
    pub class: Option<SendClass>,
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Records handed to `dispatch`, reassembled ones included.
    pub dispatched: u64,
    /// Records that could not be decoded or recovered.
    pub unknown: u64,
    /// Unknown records reinterpreted as a known kind.
    pub recovered: u64,
    /// Chunk streams reassembled.
    pub chunks_completed: u64,
    /// `CHUNK_END`s that arrived before every part.
    pub chunks_incomplete: u64,
    /// Chunk records dropped for an out-of-range count or index.
    pub chunks_rejected: u64,
    /// Hit/kill repeats dropped by the dedup window.
    pub duplicates_suppressed: u64,
    /// Host-only records received from a non-host peer.
    pub unauthorized: u64,
}

/// Host-only bookkeeping shared between reactions and the synchronizer.
#[derive(Debug, Default)]
pub struct HostState {
    /// Entities were added or removed since the last full sync.
    pub structural_dirty: bool,
    /// Next hostile id to hand out.
    pub next_hostile_id: EntityId,
    /// Seed sent with `SG`, once the match has started.
    pub game_seed: Option<u64>,
    /// Sequence for the host's own shots.
    pub next_shot_seq: u32,
    /// Sequence for hits and kills the host originates.
    pub next_report_seq: u32,
}

/// Client-only bookkeeping.
#[derive(Debug, Default)]
pub struct ClientState {
    /// Smoothing of remote entities.
    pub interpolator: EntityInterpolator,
    /// Own shots awaiting echo.
    pub shots: ShotPredictor,
    /// Sequence for own hit/kill reports.
    pub next_report_seq: u32,
    /// Whether `SG` has been received.
    pub game_started: bool,
}

/// Replication state for one peer.
pub struct ReplicationContext {
    pub(crate) config: ReplicationConfig,
    local_peer: PeerId,
    host_peer: Option<PeerId>,
    now: SimTime,
    registry: MessageRegistry,
    pub(crate) chunker: Chunker,
    pub(crate) chunks: ChunkTable,
    pub(crate) dedup: DedupWindow,
    pub(crate) store: ReplicationStore,
    pub(crate) roster: PlayerRoster,
    pub(crate) settings: GameSettings,
    pub(crate) pending: PendingSends,
    pub(crate) host: HostState,
    pub(crate) client: ClientState,
    pub(crate) stats: DispatchStats,
    outbox: Vec<Outbound>,
    events: Vec<ReplicationEvent>,
}

impl ReplicationContext {
    /// Create a context with the default registry.
    pub fn new(local_peer: PeerId, config: ReplicationConfig) -> Self {
        Self::with_registry(local_peer, config, MessageRegistry::with_defaults())
    }

    /// Create a context with a caller-built registry.
    pub fn with_registry(
        local_peer: PeerId,
        config: ReplicationConfig,
        registry: MessageRegistry,
    ) -> Self {
        let rng = scoped_rng(config.seed, local_peer.as_str());
        Self {
            chunker: Chunker::new(config.max_payload, rng),
            chunks: ChunkTable::new(),
            dedup: DedupWindow::new(config.dedup_window()),
            store: ReplicationStore::new(),
            roster: PlayerRoster::new(),
            settings: GameSettings::default(),
            pending: PendingSends::new(config.max_send_attempts),
            host: HostState {
                next_hostile_id: 1,
                ..HostState::default()
            },
            client: ClientState {
                interpolator: EntityInterpolator::new(config.interp_duration()),
                ..ClientState::default()
            },
            stats: DispatchStats::default(),
            outbox: Vec::new(),
            events: Vec::new(),
            local_peer,
            host_peer: None,
            now: SimTime::ZERO,
            registry,
            config,
        }
    }

    /// Local identity.
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Current host identity, if the session has one.
    pub fn host_peer(&self) -> Option<&PeerId> {
        self.host_peer.as_ref()
    }

    /// Update the host identity from the session collaborator.
    pub fn set_host_peer(&mut self, host: Option<PeerId>) {
        if self.host_peer != host {
            debug!(local = %self.local_peer, host = ?host, "host changed");
            self.host_peer = host;
        }
    }

    /// Role derived from the current host identity.
    pub fn role(&self) -> Role {
        Role::resolve(&self.local_peer, self.host_peer.as_ref())
    }

    /// Whether the local peer is host.
    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    /// Time of the tick being processed.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Advance the context clock.
    pub fn set_now(&mut self, now: SimTime) {
        self.now = now;
    }

    /// Replicated entities.
    pub fn store(&self) -> &ReplicationStore {
        &self.store
    }

    /// Known players.
    pub fn roster(&self) -> &PlayerRoster {
        &self.roster
    }

    /// Settings currently in effect.
    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    /// Dispatch counters.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Pending retry slots.
    pub fn pending(&self) -> &PendingSends {
        &self.pending
    }

    /// Chunk assemblies still open.
    pub fn chunks_pending(&self) -> usize {
        self.chunks.pending()
    }

    /// Own shots not yet echoed by the host.
    pub fn unconfirmed_shots(&self) -> usize {
        self.client.shots.unconfirmed()
    }

    /// Host echoes of own shots that were discarded.
    pub fn echoes_discarded(&self) -> u64 {
        self.client.shots.echoes_discarded()
    }

    /// Interpolated position of a remote entity, falling back to the store.
    pub fn displayed_position(&self, key: arena_core::EntityKey) -> Option<arena_core::Vec2> {
        self.client
            .interpolator
            .displayed_position(key, self.now)
            .or_else(|| self.store.get(key).map(|e| e.position))
    }

    /// Registry used for decoding and routing.
    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// Mutable registry access, for registering custom kinds before traffic.
    pub fn registry_mut(&mut self) -> &mut MessageRegistry {
        &mut self.registry
    }

    /// Whether the host has started the match, from this peer's point of view.
    pub fn game_started(&self) -> bool {
        if self.is_host() {
            self.host.game_seed.is_some()
        } else {
            self.client.game_started
        }
    }

    /// Queue `msg` for one peer.
    pub fn send_to(&mut self, peer: &PeerId, msg: &Message) {
        self.queue(Target::Peer(peer.clone()), msg, None);
    }

    /// Queue `msg` for the host, optionally in a retry slot.
    pub fn send_to_host(&mut self, msg: &Message, class: Option<SendClass>) {
        self.queue(Target::Host, msg, class);
    }

    /// Queue `msg` for every peer.
    pub fn broadcast(&mut self, msg: &Message) {
        self.queue(Target::Broadcast, msg, None);
    }

    /// Queue `msg` for every peer in a retry slot.
    pub fn broadcast_with_class(&mut self, msg: &Message, class: SendClass) {
        self.queue(Target::Broadcast, msg, Some(class));
    }

    /// Queue an already-encoded broadcast.
    pub(crate) fn queue_wire(&mut self, message: String) {
        self.outbox.push(Outbound {
            target: Target::Broadcast,
            message,
            class: None,
        });
    }

    fn queue(&mut self, target: Target, msg: &Message, class: Option<SendClass>) {
        let message = encode(msg);
        trace!(to = ?target, len = message.len(), "queue outbound");
        self.outbox.push(Outbound {
            target,
            message,
            class,
        });
    }

    /// Take everything queued since the last flush.
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Records queued but not yet flushed.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Report something to the game.
    pub fn push_event(&mut self, event: ReplicationEvent) {
        self.events.push(event);
    }

    /// Take every event since the last drain.
    pub fn drain_events(&mut self) -> Vec<ReplicationEvent> {
        std::mem::take(&mut self.events)
    }

    /// Accept `key` through the dedup window, counting suppressions.
    pub(crate) fn accept_once(&mut self, key: &str) -> bool {
        let accepted = self.dedup.accept(key, self.now);
        if !accepted {
            self.stats.duplicates_suppressed += 1;
            debug!(key, "duplicate event suppressed");
        }
        accepted
    }

    /// Whether `sender` speaks for the host.
    pub(crate) fn is_from_host(&self, sender: &PeerId) -> bool {
        self.host_peer.as_ref() == Some(sender)
    }

    /// Drop expired dedup entries and abandoned chunk assemblies.
    pub fn sweep(&mut self) -> (usize, usize) {
        let dedup = self.dedup.sweep(self.now);
        let chunks = self.chunks.sweep(self.now, self.config.chunk_max_age());
        if chunks > 0 {
            debug!(chunks, "abandoned chunk assemblies swept");
        }
        (dedup, chunks)
    }

    /// Decode one inbound record and run the reaction for the local role.
    pub fn dispatch(&mut self, raw: &str, sender: &PeerId) {
        self.dispatch_at_depth(raw, sender, 0);
    }

    fn dispatch_at_depth(&mut self, raw: &str, sender: &PeerId, depth: u8) {
        self.stats.dispatched += 1;
        let msg = self.registry.decode(raw);

        let msg = match msg.kind() {
            Some(_) => msg,
            None => match recover_unknown(raw) {
                Some(recovered) => {
                    debug!(%sender, kind = ?recovered.kind(), "recovered garbled record");
                    self.stats.recovered += 1;
                    recovered
                }
                None => {
                    warn!(%sender, len = raw.len(), "dropping unknown record");
                    self.stats.unknown += 1;
                    return;
                }
            },
        };
        let Some(kind) = msg.kind() else {
            return;
        };

        match kind {
            MessageKind::ChunkStart | MessageKind::ChunkPart | MessageKind::ChunkEnd => {
                if let Some(record) = self.react_chunk(&msg, sender) {
                    if depth >= MAX_DISPATCH_DEPTH {
                        warn!(%sender, "chunk nesting too deep; dropping");
                        return;
                    }
                    self.dispatch_at_depth(&record, sender, depth + 1);
                }
                return;
            }
            _ => {}
        }

        let role = self.role();
        if role == Role::Client && kind.is_host_authoritative() && !self.is_from_host(sender) {
            debug!(%sender, ?kind, "ignoring host-only record from non-host");
            self.stats.unauthorized += 1;
            return;
        }

        let reaction = match role {
            Role::Host => self.registry.host_reaction(kind),
            Role::Client => self.registry.client_reaction(kind),
        };
        match reaction {
            Some(reaction) => reaction(self, &msg, sender),
            None => trace!(?kind, ?role, "no reaction registered"),
        }
    }

    /// Feed a chunk record into the table; returns a reassembled record.
    fn react_chunk(&mut self, msg: &Message, sender: &PeerId) -> Option<String> {
        let now = self.now;
        match msg {
            Message::ChunkStart {
                kind_tag,
                total,
                chunk_id,
            } => {
                if !self.chunks.start(sender, chunk_id, kind_tag, *total, now) {
                    self.stats.chunks_rejected += 1;
                }
                None
            }
            Message::ChunkPart {
                chunk_id,
                index,
                data,
            } => {
                if !self.chunks.part(sender, chunk_id, *index, data, now) {
                    self.stats.chunks_rejected += 1;
                }
                None
            }
            Message::ChunkEnd { chunk_id } => match self.chunks.end(sender, chunk_id) {
                ChunkEndOutcome::Completed(record) => {
                    self.stats.chunks_completed += 1;
                    Some(record)
                }
                ChunkEndOutcome::Incomplete { missing } => {
                    debug!(%sender, %chunk_id, missing, "chunk end before all parts");
                    self.stats.chunks_incomplete += 1;
                    None
                }
                ChunkEndOutcome::UnknownStream => {
                    trace!(%sender, %chunk_id, "chunk end for unknown stream");
                    None
                }
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(local: &str, host: &str) -> ReplicationContext {
        let mut ctx = ReplicationContext::new(PeerId::from(local), ReplicationConfig::default());
        ctx.set_host_peer(Some(PeerId::from(host)));
        ctx
    }

    #[test]
    fn test_role_follows_host_identity() {
        assert_eq!(ctx("h", "h").role(), Role::Host);
        assert_eq!(ctx("c", "h").role(), Role::Client);
    }

    #[test]
    fn test_unknown_record_counted_not_fatal() {
        let mut client = ctx("c", "h");
        client.dispatch("garbage", &PeerId::from("h"));
        assert_eq!(client.stats().unknown, 1);
    }

    #[test]
    fn test_client_ignores_authoritative_record_from_peer() {
        let mut client = ctx("c", "h");
        client.dispatch("EA|1|0|0|10", &PeerId::from("other"));
        assert!(client.store().is_empty());
        assert_eq!(client.stats().unauthorized, 1);
    }

    #[test]
    fn test_out_of_range_chunk_records_are_dropped() {
        let mut client = ctx("c", "h");
        let host = PeerId::from("h");
        client.dispatch("CHUNK_PART|x|18446744073709551615|a", &host);
        client.dispatch("CHUNK_START|EV|50000000|x", &host);
        assert_eq!(client.chunks_pending(), 0);
        assert_eq!(client.stats().chunks_rejected, 2);

        client.dispatch("CHUNK_END|x", &host);
        assert_eq!(client.stats().chunks_completed, 0);
        assert_eq!(client.stats().unknown, 0);
    }

    #[test]
    fn test_reassembled_record_is_dispatched() {
        let mut host_ctx = ctx("h", "h");
        let ids: Vec<String> = (1..=300).map(|id| id.to_string()).collect();
        let wire = format!("EV|{}", ids.join(";"));
        let records = host_ctx.chunker.split(&wire);
        assert!(records.len() > 3);

        let mut client = ctx("c", "h");
        for record in &records {
            client.dispatch(record, &PeerId::from("h"));
        }
        assert_eq!(client.stats().chunks_completed, 1);
        assert_eq!(client.store().len(), 300);
        assert_eq!(client.chunks_pending(), 0);
    }
}
