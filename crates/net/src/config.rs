//! Tunables for the replication layer.
//!
//! Durations are stored as milliseconds so the structs map directly onto TOML.

use crate::chunking::CHUNK_ENVELOPE_OVERHEAD;
use crate::error::NetError;
use crate::protocol::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host synchronizer timers and caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the priority-ordered incremental sync.
    pub incremental_interval_ms: u64,
    /// Period of the full state broadcast.
    pub full_interval_ms: u64,
    /// Minimum spacing between full syncs, even when forced.
    pub full_min_interval_ms: u64,
    /// Maximum hostiles per incremental batch.
    pub max_batch: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            incremental_interval_ms: 75,
            full_interval_ms: 3_000,
            full_min_interval_ms: 500,
            max_batch: 10,
        }
    }
}

impl SyncConfig {
    /// Incremental sync period.
    pub fn incremental_interval(&self) -> Duration {
        Duration::from_millis(self.incremental_interval_ms)
    }

    /// Full sync period.
    pub fn full_interval(&self) -> Duration {
        Duration::from_millis(self.full_interval_ms)
    }

    /// Full sync rate limit.
    pub fn full_min_interval(&self) -> Duration {
        Duration::from_millis(self.full_min_interval_ms)
    }
}

/// Everything a [`ReplicationContext`](crate::ReplicationContext) needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Transport payload ceiling in bytes.
    pub max_payload: usize,
    /// Hit/kill dedup window.
    pub dedup_window_ms: u64,
    /// Age after which a pending chunk assembly is abandoned.
    pub chunk_max_age_ms: u64,
    /// Attempt cap for one-shot pending sends.
    pub max_send_attempts: u32,
    /// Client interpolation duration.
    pub interp_duration_ms: u64,
    /// Seed for chunk-id suffixes.
    pub seed: u64,
    /// Host timers.
    pub sync: SyncConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            dedup_window_ms: 1_000,
            chunk_max_age_ms: 10_000,
            max_send_attempts: 300,
            interp_duration_ms: 100,
            seed: 0x5EED,
            sync: SyncConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Dedup window.
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Chunk assembly age limit.
    pub fn chunk_max_age(&self) -> Duration {
        Duration::from_millis(self.chunk_max_age_ms)
    }

    /// Interpolation duration.
    pub fn interp_duration(&self) -> Duration {
        Duration::from_millis(self.interp_duration_ms)
    }

    /// Check ranges that would otherwise break chunking or the timers.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.max_payload <= CHUNK_ENVELOPE_OVERHEAD + 16 {
            return Err(NetError::InvalidConfig {
                field: "max_payload",
                reason: format!("must exceed {} bytes", CHUNK_ENVELOPE_OVERHEAD + 16),
            });
        }
        if self.sync.max_batch == 0 {
            return Err(NetError::InvalidConfig {
                field: "sync.max_batch",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sync.incremental_interval_ms == 0 {
            return Err(NetError::InvalidConfig {
                field: "sync.incremental_interval_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.sync.full_min_interval_ms > self.sync.full_interval_ms {
            return Err(NetError::InvalidConfig {
                field: "sync.full_min_interval_ms",
                reason: "must not exceed sync.full_interval_ms".to_string(),
            });
        }
        if self.max_send_attempts == 0 {
            return Err(NetError::InvalidConfig {
                field: "max_send_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
