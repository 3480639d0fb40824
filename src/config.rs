use anyhow::{Context, Result};
use arena_core::GameSettings;
use arena_net::{LoopbackConfig, ReplicationConfig, DEFAULT_MAX_PAYLOAD};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/arena.toml";

/// Headless simulation setup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimConfig {
    /// Client sessions besides the host.
    pub clients: usize,
    /// Simulated milliseconds per tick.
    pub tick_ms: u64,
    /// Ticks of active play.
    pub ticks: u64,
    /// Ticks allowed after play stops for clients to converge.
    pub settle_ticks: usize,
    /// Hostile population the host keeps topped up.
    pub hostiles: usize,
    pub hostile_health: f32,
    /// Radius of the spawn ring.
    pub arena_radius: f32,
    /// Each client fires once per this many ticks.
    pub fire_every_ticks: u64,
    pub shot_damage: f32,
    /// The host broadcasts its hostile id list once per this many ticks (0 disables).
    pub validation_every_ticks: u64,
    pub seed: u64,
    pub network: NetworkConfig,
    pub replication: ReplicationConfig,
    pub settings: GameSettings,
}

/// Loss model for the in-process network.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub drop_rate: f64,
    pub duplicate_rate: f64,
    pub reorder: bool,
    /// Largest payload one send accepts.
    pub max_payload: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            clients: 3,
            tick_ms: 16,
            ticks: 900,
            settle_ticks: 600,
            hostiles: 24,
            hostile_health: 100.0,
            arena_radius: 400.0,
            fire_every_ticks: 15,
            shot_damage: 20.0,
            validation_every_ticks: 120,
            seed: 0xA12E_4A,
            network: NetworkConfig::default(),
            replication: ReplicationConfig::default(),
            settings: GameSettings::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.02,
            duplicate_rate: 0.01,
            reorder: false,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl NetworkConfig {
    pub fn loopback(&self, seed: u64) -> LoopbackConfig {
        LoopbackConfig {
            max_payload: self.max_payload,
            drop_rate: self.drop_rate.clamp(0.0, 1.0),
            duplicate_rate: self.duplicate_rate.clamp(0.0, 1.0),
            reorder: self.reorder,
            seed,
        }
    }
}

impl SimConfig {
    /// Load from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<SimConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    SimConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_CONFIG_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                } else {
                    warn!(
                        "Simulation config not found at {}. Using defaults",
                        path.display()
                    );
                }
                SimConfig::default()
            }
        }
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
