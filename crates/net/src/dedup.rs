//! Time-windowed suppression of repeated hit/kill events.

use arena_core::SimTime;
use std::collections::HashMap;
use std::time::Duration;

/// Default suppression window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(1);

/// Rolling map of recently accepted subject keys.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    accepted: HashMap<String, SimTime>,
    suppressed: u64,
}

impl DedupWindow {
    /// Create a window of the given length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accepted: HashMap::new(),
            suppressed: 0,
        }
    }

    /// Accept `key` unless it was accepted less than one window ago.
    ///
    /// Suppressed repeats do not extend the window.
    pub fn accept(&mut self, key: &str, now: SimTime) -> bool {
        if let Some(&at) = self.accepted.get(key) {
            if now.since(at) < self.window {
                self.suppressed += 1;
                return false;
            }
        }
        self.accepted.insert(key.to_string(), now);
        true
    }

    /// Forget entries whose window has elapsed. Returns how many.
    pub fn sweep(&mut self, now: SimTime) -> usize {
        let before = self.accepted.len();
        let window = self.window;
        self.accepted.retain(|_, at| now.since(*at) < window);
        before - self.accepted.len()
    }

    /// Entries currently tracked.
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Total repeats dropped so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}
