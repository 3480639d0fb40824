//! One peer's replication session: context, synchronizer and transport,
//! driven once per simulation tick.

use crate::chunking::Chunker;
use crate::config::ReplicationConfig;
use crate::context::ReplicationContext;
use crate::events::ReplicationEvent;
use crate::host_sync::{HostSynchronizer, SyncReport};
use crate::pending::{RetryReport, Target};
use crate::transport::{SessionInfo, Transport};
use anyhow::{Context, Result};
use arena_core::{PeerId, SimTime};
use tracing::{debug, info, instrument, warn};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Physical records drained from the transport.
    pub received: usize,
    /// Periodic sync output (host only).
    pub sync: SyncReport,
    /// Logical records flushed successfully.
    pub sent: usize,
    /// Fire-and-forget records the transport refused.
    pub send_failures: usize,
    /// Records moved into a retry slot.
    pub deferred: usize,
    /// Retry pass outcome.
    pub retry: RetryReport,
    /// Dedup entries expired this tick.
    pub dedup_swept: usize,
    /// Chunk assemblies abandoned this tick.
    pub chunks_swept: usize,
}

/// Replication session over transport `T`.
pub struct PeerSession<T> {
    transport: T,
    ctx: ReplicationContext,
    host_sync: HostSynchronizer,
    ticks: u64,
}

impl<T: Transport + SessionInfo> PeerSession<T> {
    /// Validate `config` and build a session for the transport's local peer.
    pub fn new(transport: T, mut config: ReplicationConfig) -> Result<Self> {
        config
            .validate()
            .context("refusing to start replication session")?;
        let ceiling = transport.max_payload();
        if config.max_payload > ceiling {
            warn!(
                configured = config.max_payload,
                ceiling, "payload ceiling lowered to the transport's limit"
            );
            config.max_payload = ceiling;
        }

        let local = transport.local_peer();
        let host_sync = HostSynchronizer::new(config.sync.clone());
        let mut ctx = ReplicationContext::new(local.clone(), config);
        ctx.set_host_peer(transport.host_peer());
        info!(
            peer = %local,
            schema = %ctx.registry().schema_hash(),
            role = ?ctx.role(),
            "replication session ready"
        );
        Ok(Self {
            transport,
            ctx,
            host_sync,
            ticks: 0,
        })
    }

    /// Replication state.
    pub fn ctx(&self) -> &ReplicationContext {
        &self.ctx
    }

    /// Mutable replication state, for the local player's actions.
    pub fn ctx_mut(&mut self) -> &mut ReplicationContext {
        &mut self.ctx
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Host synchronizer (idle on clients).
    pub fn host_sync(&self) -> &HostSynchronizer {
        &self.host_sync
    }

    /// Local identity.
    pub fn local_peer(&self) -> &PeerId {
        self.ctx.local_peer()
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Take the gameplay events produced since the last drain.
    pub fn drain_events(&mut self) -> Vec<ReplicationEvent> {
        self.ctx.drain_events()
    }

    /// Run one tick: drain inbound, run timers, sweep, retry, flush.
    #[instrument(level = "trace", skip(self), fields(peer = %self.ctx.local_peer()))]
    pub fn tick(&mut self, now: SimTime) -> TickReport {
        let mut report = TickReport::default();
        self.ticks += 1;
        self.ctx.set_now(now);
        self.ctx.set_host_peer(self.transport.host_peer());

        let inbound = self.transport.poll();
        report.received = inbound.len();
        for (bytes, sender) in inbound {
            let raw = String::from_utf8_lossy(&bytes);
            self.ctx.dispatch(&raw, &sender);
        }

        report.sync = self.host_sync.run(&mut self.ctx);

        let (dedup_swept, chunks_swept) = self.ctx.sweep();
        report.dedup_swept = dedup_swept;
        report.chunks_swept = chunks_swept;

        // Slots recorded in earlier ticks go first; failures from this tick's
        // flush wait for the next tick.
        let local = self.ctx.local_peer().clone();
        let host = self.ctx.host_peer().cloned();
        {
            let transport = &mut self.transport;
            let ctx = &mut self.ctx;
            let chunker = &mut ctx.chunker;
            report.retry = ctx.pending.retry(|pending| {
                send_logical(
                    transport,
                    chunker,
                    &local,
                    host.as_ref(),
                    &pending.target,
                    &pending.message,
                )
            });
        }

        for out in self.ctx.drain_outbox() {
            let delivered = send_logical(
                &mut self.transport,
                &mut self.ctx.chunker,
                &local,
                host.as_ref(),
                &out.target,
                &out.message,
            );
            if delivered {
                report.sent += 1;
                continue;
            }
            match out.class {
                Some(class) => {
                    self.ctx.pending.record(class, out.message, out.target);
                    report.deferred += 1;
                }
                None => {
                    debug!(to = ?out.target, "send failed; dropping");
                    report.send_failures += 1;
                }
            }
        }

        report
    }
}

/// Chunk `wire` if needed and hand every physical record to the transport.
///
/// A send addressed to the host from the host itself is a no-op success.
fn send_logical<T: Transport>(
    transport: &mut T,
    chunker: &mut Chunker,
    local: &PeerId,
    host: Option<&PeerId>,
    target: &Target,
    wire: &str,
) -> bool {
    let peer = match target {
        Target::Peer(peer) => Some(peer),
        Target::Host => match host {
            Some(host) if host == local => return true,
            Some(host) => Some(host),
            None => return false,
        },
        Target::Broadcast => None,
    };
    for record in chunker.split(wire) {
        let ok = match peer {
            Some(peer) => transport.send(peer, record.as_bytes()),
            None => transport.broadcast(record.as_bytes()),
        };
        if !ok {
            return false;
        }
    }
    true
}
