//! Match settings shared by the host with every client.
//!
//! Settings travel as `key=value` pairs. Unknown keys are kept verbatim in
//! [`GameSettings::extra`] so newer hosts can talk to older clients.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors produced while applying a settings pair.
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    /// The value could not be parsed for a known key.
    #[error("invalid value {value:?} for setting {key}")]
    InvalidValue {
        /// Setting key.
        key: String,
        /// Raw value.
        value: String,
    },
}

/// Host-controlled match configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Damage multiplier applied to hostile attacks.
    pub difficulty: f32,
    /// Hostile movement speed in units per second.
    pub hostile_speed: f32,
    /// Upper bound on simultaneously alive hostiles.
    pub max_hostiles: u32,
    /// Whether players can damage each other.
    pub friendly_fire: bool,
    /// Round length in seconds.
    pub round_secs: u32,
    /// Additional keys not understood by this build.
    pub extra: BTreeMap<String, String>,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            difficulty: 1.0,
            hostile_speed: 120.0,
            max_hostiles: 32,
            friendly_fire: false,
            round_secs: 300,
            extra: BTreeMap::new(),
        }
    }
}

impl GameSettings {
    /// Flatten into ordered `(key, value)` pairs.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("difficulty".to_string(), self.difficulty.to_string()),
            ("hostile_speed".to_string(), self.hostile_speed.to_string()),
            ("max_hostiles".to_string(), self.max_hostiles.to_string()),
            (
                "friendly_fire".to_string(),
                u8::from(self.friendly_fire).to_string(),
            ),
            ("round_secs".to_string(), self.round_secs.to_string()),
        ];
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }

    /// Apply one pair. Unknown keys land in `extra`.
    pub fn apply_pair(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "difficulty" => self.difficulty = value.parse().map_err(|_| invalid())?,
            "hostile_speed" => self.hostile_speed = value.parse().map_err(|_| invalid())?,
            "max_hostiles" => self.max_hostiles = value.parse().map_err(|_| invalid())?,
            "friendly_fire" => {
                self.friendly_fire = match value {
                    "1" | "true" => true,
                    "0" | "false" => false,
                    _ => return Err(invalid()),
                }
            }
            "round_secs" => self.round_secs = value.parse().map_err(|_| invalid())?,
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Rebuild settings from pairs, skipping values that fail to parse.
    pub fn from_pairs<'a, I>(pairs: I) -> (Self, Vec<SettingsError>)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::default();
        let mut errors = Vec::new();
        for (key, value) in pairs {
            if let Err(err) = settings.apply_pair(key, value) {
                errors.push(err);
            }
        }
        (settings, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_roundtrip() {
        let mut settings = GameSettings {
            difficulty: 2.5,
            friendly_fire: true,
            ..GameSettings::default()
        };
        settings.extra.insert("map".into(), "dunes".into());

        let pairs = settings.to_pairs();
        let (rebuilt, errors) =
            GameSettings::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        assert!(errors.is_empty());
        assert_eq!(rebuilt, settings);
    }

    #[test]
    fn bad_value_is_reported_and_skipped() {
        let (settings, errors) = GameSettings::from_pairs([("max_hostiles", "lots")]);
        assert_eq!(settings.max_hostiles, GameSettings::default().max_hostiles);
        assert_eq!(errors.len(), 1);
    }
}
