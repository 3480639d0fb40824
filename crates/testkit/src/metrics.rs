//! Replication metrics exported as JSON for CI artifacts.
//!
//! A report is a snapshot of a [`Cluster`]: loopback delivery counters, the
//! host synchronizer's output and each client's dispatch counters plus its
//! divergence from the host at capture time.

use crate::cluster::Cluster;
use anyhow::Result;
use arena_net::LoopbackStats;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Test result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    /// Test passed all checks
    Pass,
    /// Test failed one or more checks
    Fail,
}

/// Top-level report written to `metrics.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationMetrics {
    /// Scenario identifier
    pub test_name: String,
    /// Capture time (RFC 3339)
    pub timestamp: String,
    /// Overall result
    pub result: TestResult,
    /// Simulated milliseconds elapsed
    pub sim_time_ms: u64,
    /// Loopback delivery counters
    pub network: NetworkCounters,
    /// Host synchronizer counters
    pub host: HostCounters,
    /// One entry per client
    pub clients: Vec<ClientCounters>,
}

/// Loopback delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    /// Payloads delivered
    pub delivered: u64,
    /// Payloads lost
    pub dropped: u64,
    /// Extra copies delivered
    pub duplicated: u64,
    /// Sends refused as oversize
    pub oversize: u64,
    /// Sends refused while unreachable
    pub refused: u64,
}

impl From<LoopbackStats> for NetworkCounters {
    fn from(stats: LoopbackStats) -> Self {
        Self {
            delivered: stats.delivered,
            dropped: stats.dropped,
            duplicated: stats.duplicated,
            oversize: stats.oversize,
            refused: stats.refused,
        }
    }
}

/// Host-side counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostCounters {
    /// Entities in the host table
    pub entities: usize,
    /// Incremental batches sent
    pub incremental_batches: u64,
    /// Hostile records carried by incremental batches
    pub entities_sent: u64,
    /// Batches shrunk to fit the payload ceiling
    pub batches_shrunk: u64,
    /// Full syncs sent
    pub full_syncs: u64,
    /// Full syncs triggered by a structural change
    pub forced_full_syncs: u64,
    /// Duplicate hit/kill reports suppressed
    pub duplicates_suppressed: u64,
    /// Host-only records rejected
    pub unauthorized: u64,
}

/// One client's counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCounters {
    /// Client identity
    pub peer: String,
    /// Entities in the client table
    pub entities: usize,
    /// Records handed to a reaction
    pub dispatched: u64,
    /// Records that decoded to nothing
    pub unknown: u64,
    /// Unknown records salvaged as entity lists
    pub recovered: u64,
    /// Chunk assemblies completed
    pub chunks_completed: u64,
    /// Chunk assemblies that ended with parts missing
    pub chunks_incomplete: u64,
    /// Records rejected for coming from a non-host
    pub unauthorized: u64,
    /// Own shots still awaiting their echo
    pub unconfirmed_shots: usize,
    /// Hostiles missing relative to the host
    pub missing: usize,
    /// Hostiles the host no longer has
    pub ghosts: usize,
    /// Hostiles outside position or health tolerance
    pub stale: usize,
}

impl ReplicationMetrics {
    /// Snapshot `cluster`. The result is [`TestResult::Pass`] when every
    /// client has converged on the host's hostile table.
    pub fn capture(test_name: impl Into<String>, cluster: &Cluster) -> Self {
        let host_ctx = cluster.host().ctx();
        let sync = cluster.host().host_sync().metrics();
        let host = HostCounters {
            entities: host_ctx.store().len(),
            incremental_batches: sync.incremental_batches,
            entities_sent: sync.entities_sent,
            batches_shrunk: sync.batches_shrunk,
            full_syncs: sync.full_syncs,
            forced_full_syncs: sync.forced_full_syncs,
            duplicates_suppressed: host_ctx.stats().duplicates_suppressed,
            unauthorized: host_ctx.stats().unauthorized,
        };

        let clients: Vec<ClientCounters> = cluster
            .clients()
            .iter()
            .enumerate()
            .map(|(i, session)| {
                let ctx = session.ctx();
                let stats = ctx.stats();
                let divergence = cluster.divergence(i);
                ClientCounters {
                    peer: session.local_peer().to_string(),
                    entities: ctx.store().len(),
                    dispatched: stats.dispatched,
                    unknown: stats.unknown,
                    recovered: stats.recovered,
                    chunks_completed: stats.chunks_completed,
                    chunks_incomplete: stats.chunks_incomplete,
                    unauthorized: stats.unauthorized,
                    unconfirmed_shots: ctx.unconfirmed_shots(),
                    missing: divergence.missing.len(),
                    ghosts: divergence.ghosts.len(),
                    stale: divergence.stale.len(),
                }
            })
            .collect();

        let converged = clients
            .iter()
            .all(|c| c.missing == 0 && c.ghosts == 0 && c.stale == 0);

        Self {
            test_name: test_name.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            result: if converged {
                TestResult::Pass
            } else {
                TestResult::Fail
            },
            sim_time_ms: cluster.now().as_millis(),
            network: cluster.net().stats().into(),
            host,
            clients,
        }
    }
}

/// Sink for writing metrics reports to JSON files
pub struct MetricsSink {
    path: std::path::PathBuf,
}

impl MetricsSink {
    /// Create a new metrics sink at the specified path
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Write a report, replacing the file.
    pub fn write(&self, report: &ReplicationMetrics) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        let mut file = File::create(&self.path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, ClusterConfig};
    use arena_core::Vec2;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn metrics_capture_reflects_cluster() {
        let mut cluster = Cluster::new(ClusterConfig::default()).unwrap();
        cluster.connect_all();
        for i in 0..5 {
            cluster
                .host_mut()
                .ctx_mut()
                .spawn_hostile(Vec2::new(i as f32 * 20.0, 0.0), 60.0);
        }
        cluster.run(10);

        let report = ReplicationMetrics::capture("capture", &cluster);
        assert_eq!(report.result, TestResult::Pass);
        assert_eq!(report.clients.len(), 2);
        assert_eq!(report.sim_time_ms, 160);
        assert!(report.host.incremental_batches > 0);
        assert!(report.network.delivered > 0);
        assert!(report.clients.iter().all(|c| c.dispatched > 0));
    }

    #[test]
    fn metrics_report_roundtrip() {
        let cluster = Cluster::new(ClusterConfig::default()).unwrap();
        let report = ReplicationMetrics::capture("roundtrip", &cluster);
        let json = serde_json::to_string_pretty(&report).unwrap();
        let parsed: ReplicationMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.test_name, "roundtrip");
        assert_eq!(parsed.result, TestResult::Pass);
        assert_eq!(parsed.clients[1].peer, "client-2");
    }

    #[test]
    fn metrics_sink_writes_file() {
        let path = std::env::temp_dir().join(format!(
            "arena-metrics-{}.json",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let cluster = Cluster::new(ClusterConfig::default()).unwrap();
        let report = ReplicationMetrics::capture("sink_test", &cluster);

        let sink = MetricsSink::create(&path).unwrap();
        sink.write(&report).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("sink_test"));
        assert!(contents.contains("\"result\": \"pass\""));

        fs::remove_file(&path).ok();
    }
}
