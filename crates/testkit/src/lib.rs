#![warn(missing_docs)]
//! Deterministic testing surfaces: an in-process session cluster, an event
//! stream writer and JSON metrics.

mod cluster;
mod metrics;

use anyhow::Result;
use arena_net::ReplicationEvent;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub use cluster::*;
pub use metrics::*;

/// One line of the event stream.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Simulated milliseconds when the event was drained.
    pub time_ms: u64,
    /// Session that observed it.
    pub peer: &'a str,
    /// Short kind label.
    pub kind: &'static str,
    /// Debug rendering of the event.
    pub detail: String,
}

impl<'a> EventRecord<'a> {
    /// Flatten an observed event.
    pub fn from_observed(observed: &'a ObservedEvent) -> Self {
        Self {
            time_ms: observed.time.as_millis(),
            peer: observed.peer.as_str(),
            kind: event_kind(&observed.event),
            detail: format!("{:?}", observed.event),
        }
    }
}

/// Stable label for an event variant.
pub fn event_kind(event: &ReplicationEvent) -> &'static str {
    match event {
        ReplicationEvent::PlayerJoined { .. } => "player_joined",
        ReplicationEvent::PlayerLeft { .. } => "player_left",
        ReplicationEvent::PlayerMoved { .. } => "player_moved",
        ReplicationEvent::BulletFired { .. } => "bullet_fired",
        ReplicationEvent::HostileSpawned { .. } => "hostile_spawned",
        ReplicationEvent::HostileDamaged { .. } => "hostile_damaged",
        ReplicationEvent::HostileRemoved { .. } => "hostile_removed",
        ReplicationEvent::HostileKilled { .. } => "hostile_killed",
        ReplicationEvent::PlayerDamaged { .. } => "player_damaged",
        ReplicationEvent::PlayerDied { .. } => "player_died",
        ReplicationEvent::ReadyChanged { .. } => "ready_changed",
        ReplicationEvent::GameStarted { .. } => "game_started",
        ReplicationEvent::ChatReceived { .. } => "chat_received",
        ReplicationEvent::SettingsChanged(_) => "settings_changed",
    }
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: BufWriter<File>,
    lines: usize,
}

impl JsonlSink {
    /// Create a new sink at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            lines: 0,
        })
    }

    /// Append an event to the log.
    pub fn write(&mut self, event: &EventRecord<'_>) -> Result<()> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Append every observed event.
    pub fn write_all(&mut self, events: &[ObservedEvent]) -> Result<()> {
        for observed in events {
            self.write(&EventRecord::from_observed(observed))?;
        }
        Ok(())
    }

    /// Lines written so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}
