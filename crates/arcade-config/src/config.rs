//! Configuration structs with defaults, validation and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Transport connection and reconnection settings.
    pub network: NetworkConfig,
    /// Reconciliation and turn-coordination settings.
    pub sync: SyncConfig,
    /// Dice race settings.
    pub race: RaceConfig,
    /// Movement animation timing.
    pub animation: AnimationConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Pub/sub server host.
    pub server_address: String,
    /// Pub/sub server port.
    pub server_port: u16,
    /// Largest accepted frame payload in bytes.
    pub max_frame_bytes: u32,
    /// Delay before the first reconnection attempt, in milliseconds.
    pub reconnect_initial_delay_ms: u64,
    /// Multiplier applied to the delay after every failed attempt.
    pub reconnect_backoff_multiplier: f64,
    /// Upper bound on the reconnection delay, in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Attempts before the adapter gives up and stays disconnected.
    pub reconnect_max_attempts: u32,
    /// Jitter factor (0.0 - 1.0) applied as +/- to each delay.
    pub reconnect_jitter: f64,
}

/// Reconciliation and turn-coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Consecutive rejected updates that trigger a snapshot refetch.
    pub staleness_budget: u32,
    /// How many rounds a `round:complete` push may lag behind the local round.
    pub round_lag_tolerance: u32,
    /// Capacity of each room actor's mailbox.
    pub mailbox_capacity: usize,
}

/// Dice race configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RaceConfig {
    /// Faces on the die rolled by the initiator.
    pub die_sides: u32,
    /// Cells on the track used by the in-process match service.
    pub track_length: i64,
}

/// Movement animation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnimationConfig {
    /// Time every shared step index is held, in milliseconds.
    pub step_dwell_ms: u64,
    /// Portion of the dwell a moving participant is flagged "in motion".
    pub jump_ms: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Fixed seed for initiator dice and wheel spins; random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 7878,
            max_frame_bytes: 1_048_576,
            reconnect_initial_delay_ms: 1_000,
            reconnect_backoff_multiplier: 2.0,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 10,
            reconnect_jitter: 0.25,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness_budget: 3,
            round_lag_tolerance: 1,
            mailbox_capacity: 256,
        }
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            die_sides: 6,
            track_length: 20,
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            step_dwell_ms: 500,
            jump_ms: 400,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            rng_seed: None,
        }
    }
}

impl NetworkConfig {
    /// `host:port` string for the pub/sub server.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }
}

impl AnimationConfig {
    /// Step dwell as a [`Duration`].
    pub fn step_dwell(&self) -> Duration {
        Duration::from_millis(self.step_dwell_ms)
    }

    /// Jump portion of the dwell as a [`Duration`].
    pub fn jump(&self) -> Duration {
        Duration::from_millis(self.jump_ms)
    }
}

/// Platform config directory for arcade, e.g. `~/.config/arcade`.
///
/// Falls back to `./arcade` when the platform has no config dir.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("arcade"))
        .unwrap_or_else(|| PathBuf::from("arcade"))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized)
            .map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents =
            std::fs::read_to_string(config_dir.join(CONFIG_FILE)).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values that parse but cannot drive the runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.race.die_sides < 2 {
            return Err(ConfigError::Invalid {
                field: "race.die_sides",
                reason: format!("a die needs at least 2 sides, got {}", self.race.die_sides),
            });
        }
        if self.race.track_length < 1 {
            return Err(ConfigError::Invalid {
                field: "race.track_length",
                reason: format!("must be positive, got {}", self.race.track_length),
            });
        }
        if self.sync.staleness_budget == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.staleness_budget",
                reason: "must allow at least one rejected update".to_string(),
            });
        }
        if self.sync.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.mailbox_capacity",
                reason: "mailbox must hold at least one command".to_string(),
            });
        }
        if self.animation.jump_ms > self.animation.step_dwell_ms {
            return Err(ConfigError::Invalid {
                field: "animation.jump_ms",
                reason: format!(
                    "jump ({} ms) cannot outlast the step dwell ({} ms)",
                    self.animation.jump_ms, self.animation.step_dwell_ms
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.network.reconnect_jitter) {
            return Err(ConfigError::Invalid {
                field: "network.reconnect_jitter",
                reason: format!("must be within 0.0..=1.0, got {}", self.network.reconnect_jitter),
            });
        }
        Ok(())
    }
}
