//! Client-side smoothing and prediction bookkeeping.
//!
//! Remote entities are never snapped to a new authoritative position; they
//! glide from where they were displayed toward the update over a short, fixed
//! duration. Shots the local player already rendered are remembered so the
//! host's echo can be recognized.

use arena_core::{EntityKey, SimTime, Vec2};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Default time to reach a new target.
pub const DEFAULT_INTERP_DURATION: Duration = Duration::from_millis(100);

/// Maximum number of unconfirmed local shots remembered.
const MAX_PREDICTED_SHOTS: usize = 128;

#[derive(Debug, Clone, Copy)]
struct Track {
    previous: Vec2,
    target: Vec2,
    update_time: SimTime,
}

impl Track {
    fn at(&self, now: SimTime, duration: Duration) -> Vec2 {
        let alpha = if duration.is_zero() {
            1.0
        } else {
            (now.since(self.update_time).as_secs_f32() / duration.as_secs_f32()).clamp(0.0, 1.0)
        };
        self.previous + (self.target - self.previous) * alpha
    }
}

/// Entity interpolator for smooth remote entity movement.
#[derive(Debug)]
pub struct EntityInterpolator {
    tracks: HashMap<EntityKey, Track>,
    duration: Duration,
}

impl EntityInterpolator {
    /// Create an interpolator reaching targets after `duration`.
    pub fn new(duration: Duration) -> Self {
        Self {
            tracks: HashMap::new(),
            duration,
        }
    }

    /// Start gliding toward `target` from wherever the entity is displayed now.
    ///
    /// `fallback` is used as the starting point when the entity has no track yet.
    pub fn retarget(&mut self, key: EntityKey, target: Vec2, fallback: Vec2, now: SimTime) {
        let previous = self
            .tracks
            .get(&key)
            .map(|track| track.at(now, self.duration))
            .unwrap_or(fallback);
        self.tracks.insert(
            key,
            Track {
                previous,
                target,
                update_time: now,
            },
        );
    }

    /// Place an entity at `position` with no glide, e.g. on spawn.
    pub fn snap(&mut self, key: EntityKey, position: Vec2, now: SimTime) {
        self.tracks.insert(
            key,
            Track {
                previous: position,
                target: position,
                update_time: now,
            },
        );
    }

    /// Position to render for `key` at `now`.
    pub fn displayed_position(&self, key: EntityKey, now: SimTime) -> Option<Vec2> {
        self.tracks
            .get(&key)
            .map(|track| track.at(now, self.duration))
    }

    /// Latest authoritative target for `key`.
    pub fn target(&self, key: EntityKey) -> Option<Vec2> {
        self.tracks.get(&key).map(|track| track.target)
    }

    /// Stop tracking `key`.
    pub fn forget(&mut self, key: EntityKey) {
        self.tracks.remove(&key);
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl Default for EntityInterpolator {
    fn default() -> Self {
        Self::new(DEFAULT_INTERP_DURATION)
    }
}

/// Local shots awaiting the host's echo.
#[derive(Debug, Default)]
pub struct ShotPredictor {
    next_seq: u32,
    unconfirmed: VecDeque<u32>,
    echoes_discarded: u64,
}

impl ShotPredictor {
    /// Allocate a sequence number for a shot that is rendered immediately.
    pub fn predict(&mut self) -> u32 {
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        if self.unconfirmed.len() >= MAX_PREDICTED_SHOTS {
            self.unconfirmed.pop_front();
        }
        self.unconfirmed.push_back(self.next_seq);
        self.next_seq
    }

    /// Record the host's echo of one of our shots. Returns true if the shot
    /// was still unconfirmed.
    pub fn confirm(&mut self, seq: u32) -> bool {
        self.echoes_discarded += 1;
        match self.unconfirmed.iter().position(|&s| s == seq) {
            Some(index) => {
                self.unconfirmed.remove(index);
                true
            }
            None => false,
        }
    }

    /// Shots not yet echoed.
    pub fn unconfirmed(&self) -> usize {
        self.unconfirmed.len()
    }

    /// Echoes discarded so far.
    pub fn echoes_discarded(&self) -> u64 {
        self.echoes_discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: EntityKey = EntityKey::hostile(1);

    #[test]
    fn test_interpolates_linearly_then_holds() {
        let mut interp = EntityInterpolator::default();
        interp.snap(KEY, Vec2::ZERO, SimTime::ZERO);
        interp.retarget(KEY, Vec2::new(10.0, 0.0), Vec2::ZERO, SimTime::ZERO);

        let half = interp
            .displayed_position(KEY, SimTime::from_millis(50))
            .unwrap();
        assert!((half.x - 5.0).abs() < 1e-4);

        let done = interp
            .displayed_position(KEY, SimTime::from_millis(500))
            .unwrap();
        assert_eq!(done, Vec2::new(10.0, 0.0));
    }

    #[test]
    fn test_retarget_starts_from_displayed_position() {
        let mut interp = EntityInterpolator::default();
        interp.snap(KEY, Vec2::ZERO, SimTime::ZERO);
        interp.retarget(KEY, Vec2::new(10.0, 0.0), Vec2::ZERO, SimTime::ZERO);
        // Halfway there when the next update lands.
        interp.retarget(
            KEY,
            Vec2::new(10.0, 10.0),
            Vec2::ZERO,
            SimTime::from_millis(50),
        );

        let start = interp
            .displayed_position(KEY, SimTime::from_millis(50))
            .unwrap();
        assert!((start - Vec2::new(5.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_unknown_track_uses_fallback() {
        let mut interp = EntityInterpolator::default();
        interp.retarget(KEY, Vec2::new(4.0, 4.0), Vec2::new(2.0, 2.0), SimTime::ZERO);
        assert_eq!(
            interp.displayed_position(KEY, SimTime::ZERO),
            Some(Vec2::new(2.0, 2.0))
        );
    }

    #[test]
    fn test_shot_echo_confirms_once() {
        let mut shots = ShotPredictor::default();
        let seq = shots.predict();
        assert_eq!(shots.unconfirmed(), 1);
        assert!(shots.confirm(seq));
        assert!(!shots.confirm(seq));
        assert_eq!(shots.unconfirmed(), 0);
        assert_eq!(shots.echoes_discarded(), 2);
    }

    #[test]
    fn test_unconfirmed_shots_are_bounded() {
        let mut shots = ShotPredictor::default();
        for _ in 0..500 {
            shots.predict();
        }
        assert_eq!(shots.unconfirmed(), MAX_PREDICTED_SHOTS);
    }
}
