//! Retry slots for sends that failed because the transport was not ready.

use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Logical message class; each class owns at most one pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SendClass {
    /// Our `C` announcement.
    Connect,
    /// Our latest `R` status.
    ReadyStatus,
    /// Our `GSR` request.
    SettingsRequest,
    /// A host full sync.
    FullSync,
}

impl SendClass {
    /// One-shot classes give up after a bounded number of attempts; periodic
    /// ones are retried until superseded.
    pub fn is_one_shot(self) -> bool {
        !matches!(self, SendClass::FullSync)
    }
}

/// Where a record is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A single peer.
    Peer(arena_core::PeerId),
    /// Whoever is currently host.
    Host,
    /// Every session peer.
    Broadcast,
}

/// A logical record waiting to be re-sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    /// Slot owner.
    pub class: SendClass,
    /// Logical wire record, re-chunked on every attempt.
    pub message: String,
    /// Destination.
    pub target: Target,
    /// Failed attempts so far.
    pub attempts: u32,
}

/// Outcome of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Sends that went through this pass.
    pub delivered: usize,
    /// One-shot sends dropped after exhausting their attempts.
    pub abandoned: usize,
}

/// Pending slots keyed by [`SendClass`].
#[derive(Debug)]
pub struct PendingSends {
    slots: BTreeMap<SendClass, PendingSend>,
    max_attempts: u32,
}

impl PendingSends {
    /// Create an empty set with the one-shot attempt cap.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            slots: BTreeMap::new(),
            max_attempts,
        }
    }

    /// Record a failed send, replacing whatever the class had queued.
    pub fn record(&mut self, class: SendClass, message: String, target: Target) {
        debug!(?class, "queueing send for retry");
        self.slots.insert(
            class,
            PendingSend {
                class,
                message,
                target,
                attempts: 1,
            },
        );
    }

    /// Drop a class's slot, e.g. when a newer message supersedes it.
    pub fn cancel(&mut self, class: SendClass) -> Option<PendingSend> {
        self.slots.remove(&class)
    }

    /// Retry every slot with `send`; delivered slots are discarded.
    pub fn retry<F>(&mut self, mut send: F) -> RetryReport
    where
        F: FnMut(&PendingSend) -> bool,
    {
        let mut report = RetryReport::default();
        let max_attempts = self.max_attempts;
        self.slots.retain(|class, pending| {
            if send(pending) {
                report.delivered += 1;
                return false;
            }
            pending.attempts += 1;
            if class.is_one_shot() && pending.attempts >= max_attempts {
                warn!(?class, attempts = pending.attempts, "giving up on send");
                report.abandoned += 1;
                return false;
            }
            true
        });
        report
    }

    /// Whether `class` has a slot.
    pub fn contains(&self, class: SendClass) -> bool {
        self.slots.contains_key(&class)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether every slot is free.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
