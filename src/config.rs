//! Configuration management with validation and defaults
//!
//! `EngineConfig` is loaded once at startup from TOML plus environment
//! overrides. `GameConfig` is the operator-mutable part; the scheduler copies it
//! into each round at `start_round`, so edits only affect the next round.

use crate::errors::{ConfigurationError, EngineError, EngineResult};
use crate::types::{Amount, Multiplier, RoundParams, UNITS_PER_TOKEN};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

/// Full engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fairness: FairnessConfig,
    #[serde(default)]
    pub tickets: TicketConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Operator-controlled game settings, read fresh at every round start
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub game_enabled: bool,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub betting_duration_secs: u64,
    pub max_multiplier: Multiplier,
    pub instant_crash_probability: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            game_enabled: true,
            min_bet: UNITS_PER_TOKEN,
            max_bet: 1_000 * UNITS_PER_TOKEN,
            betting_duration_secs: 15,
            max_multiplier: Multiplier::from_hundredths(100_000),
            instant_crash_probability: 0.03,
        }
    }
}

impl GameConfig {
    pub fn round_params(&self) -> RoundParams {
        RoundParams {
            min_bet: self.min_bet,
            max_bet: self.max_bet,
            betting_duration_secs: self.betting_duration_secs,
            max_multiplier: self.max_multiplier,
            instant_crash_probability: self.instant_crash_probability,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_bet == 0 || self.min_bet > self.max_bet {
            return Err(ConfigurationError::InvalidValue {
                field: "game.min_bet".to_string(),
                value: self.min_bet.to_string(),
                reason: "min_bet must be > 0 and <= max_bet".to_string(),
            });
        }
        if self.betting_duration_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "game.betting_duration_secs".to_string(),
                value: "0".to_string(),
                reason: "betting window cannot be empty".to_string(),
            });
        }
        if self.max_multiplier <= Multiplier::ONE {
            return Err(ConfigurationError::InvalidValue {
                field: "game.max_multiplier".to_string(),
                value: self.max_multiplier.to_string(),
                reason: "max_multiplier must exceed 1.00x".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.instant_crash_probability) {
            return Err(ConfigurationError::InvalidValue {
                field: "game.instant_crash_probability".to_string(),
                value: self.instant_crash_probability.to_string(),
                reason: "probability must be in [0, 1)".to_string(),
            });
        }
        Ok(())
    }
}

/// Round phase timing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub countdown_secs: u64,
    pub inter_round_delay_ms: u64,
    /// Flight loop resolution for auto cash-outs and events
    pub tick_interval_ms: u64,
    /// Allowed lead of a client's observed multiplier over the server's
    pub cashout_tolerance: Multiplier,
    pub event_buffer: usize,
}

impl SchedulerConfig {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn inter_round_delay(&self) -> Duration {
        Duration::from_millis(self.inter_round_delay_ms)
    }

    /// Never zero, so the flight loop always yields.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            inter_round_delay_ms: 5_000,
            tick_interval_ms: 50,
            cashout_tolerance: Multiplier::from_hundredths(5),
            event_buffer: 1_024,
        }
    }
}

/// Crash derivation constants
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FairnessConfig {
    /// House edge as a fraction (0.01 == 1%)
    pub house_edge: f64,
    /// Growth rate r in m(t) = e^(r t), per second
    pub growth_rate: f64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            house_edge: 0.01,
            growth_rate: 0.06,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketConfig {
    pub ttl_secs: u64,
    /// Accepted stake denominations; empty accepts any value
    pub denominations: Vec<Amount>,
    pub recovery_poll_interval_secs: u64,
    /// Pending purchases older than this are abandoned
    pub recovery_ttl_secs: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 24 * 60 * 60,
            denominations: vec![
                UNITS_PER_TOKEN,
                5 * UNITS_PER_TOKEN,
                10 * UNITS_PER_TOKEN,
                50 * UNITS_PER_TOKEN,
                100 * UNITS_PER_TOKEN,
            ],
            recovery_poll_interval_secs: 10,
            recovery_ttl_secs: 30 * 60,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Hex-encoded ed25519 secret key used to sign claim vouchers
    pub claim_signing_key: Option<String>,
    /// Mirror round transitions to the prize-pool contract
    pub mirror_rounds: bool,
    pub balance_sync_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Keep state in memory only (testing)
    pub in_memory: bool,
    pub write_buffer_size_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/crash_data".to_string(),
            in_memory: false,
            write_buffer_size_mb: 64,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Required in `X-Operator-Key` for round control when set
    pub operator_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            operator_key: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_filter: String,
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "crash_engine=info,tower_http=info".to_string(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Short phases, no persistence
    pub fn testing() -> Self {
        Self {
            game: GameConfig {
                betting_duration_secs: 1,
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                countdown_secs: 0,
                inter_round_delay_ms: 10,
                tick_interval_ms: 5,
                ..Default::default()
            },
            fairness: FairnessConfig {
                growth_rate: 5.0,
                ..Default::default()
            },
            storage: StorageConfig {
                in_memory: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn production() -> Self {
        Self {
            settlement: SettlementConfig {
                mirror_rounds: true,
                balance_sync_interval_secs: 60,
                ..Default::default()
            },
            storage: StorageConfig {
                data_directory: "./DB/crash_data".to_string(),
                in_memory: false,
                write_buffer_size_mb: 128,
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.game.validate()?;

        if !(0.0..0.5).contains(&self.fairness.house_edge) {
            return Err(ConfigurationError::InvalidValue {
                field: "fairness.house_edge".to_string(),
                value: self.fairness.house_edge.to_string(),
                reason: "house edge must be in [0, 0.5)".to_string(),
            });
        }
        if !(self.fairness.growth_rate > 0.0 && self.fairness.growth_rate.is_finite()) {
            return Err(ConfigurationError::InvalidValue {
                field: "fairness.growth_rate".to_string(),
                value: self.fairness.growth_rate.to_string(),
                reason: "growth rate must be positive".to_string(),
            });
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "scheduler.tick_interval_ms".to_string(),
                value: "0".to_string(),
                reason: "tick interval must be > 0".to_string(),
            });
        }
        if self.tickets.ttl_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "tickets.ttl_secs".to_string(),
                value: "0".to_string(),
                reason: "tickets must live longer than zero seconds".to_string(),
            });
        }
        if !self.storage.in_memory && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "storage.data_directory is required unless in_memory".to_string(),
            ));
        }
        if self.api.port == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "api.port".to_string(),
                value: "0".to_string(),
                reason: "API port cannot be zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Live operator view of `GameConfig` plus the pause banner.
///
/// Readers take a snapshot; nothing holds the lock across a round.
#[derive(Debug)]
pub struct GameControl {
    config: RwLock<GameConfig>,
    paused_reason: RwLock<Option<String>>,
}

impl GameControl {
    pub fn new(config: GameConfig) -> Self {
        let paused_reason = if config.game_enabled {
            None
        } else {
            Some("game disabled by configuration".to_string())
        };
        Self {
            config: RwLock::new(config),
            paused_reason: RwLock::new(paused_reason),
        }
    }

    pub fn snapshot(&self) -> GameConfig {
        self.config.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn update(&self, next: GameConfig) -> Result<GameConfig, ConfigurationError> {
        next.validate()?;
        let mut config = self
            .config
            .write()
            .map_err(|_| ConfigurationError::ValidationFailed("game config lock poisoned".into()))?;
        *config = next.clone();
        drop(config);

        if let Ok(mut reason) = self.paused_reason.write() {
            match (next.game_enabled, reason.is_some()) {
                (true, _) => *reason = None,
                (false, false) => *reason = Some("game disabled by operator".to_string()),
                (false, true) => {}
            }
        }
        Ok(next)
    }

    pub fn pause(&self, reason: impl Into<String>) {
        if let Ok(mut config) = self.config.write() {
            config.game_enabled = false;
        }
        if let Ok(mut paused) = self.paused_reason.write() {
            *paused = Some(reason.into());
        }
    }

    pub fn resume(&self) {
        if let Ok(mut config) = self.config.write() {
            config.game_enabled = true;
        }
        if let Ok(mut paused) = self.paused_reason.write() {
            *paused = None;
        }
    }

    pub fn paused_reason(&self) -> Option<String> {
        self.paused_reason.read().ok().and_then(|r| r.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().map(|c| c.game_enabled).unwrap_or(false)
    }

    /// `OperationalPause` unless new rounds and bets are accepted.
    pub fn ensure_enabled(&self) -> EngineResult<()> {
        if self.is_enabled() {
            return Ok(());
        }
        Err(EngineError::paused(
            self.paused_reason()
                .unwrap_or_else(|| "game disabled".to_string()),
        ))
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigurationError> {
        if let Some(enabled) = env_parse::<bool>("CRASH_GAME_ENABLED")? {
            config.game.game_enabled = enabled;
        }
        if let Some(secs) = env_parse::<u64>("CRASH_BETTING_DURATION_SECS")? {
            config.game.betting_duration_secs = secs;
        }
        if let Some(max) = env_parse::<f64>("CRASH_MAX_MULTIPLIER")? {
            config.game.max_multiplier = Multiplier::from_f64(max);
        }
        if let Some(p) = env_parse::<f64>("CRASH_INSTANT_CRASH_PROBABILITY")? {
            config.game.instant_crash_probability = p;
        }
        if let Ok(dir) = env::var("CRASH_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Some(port) = env_parse::<u16>("CRASH_API_PORT")? {
            config.api.port = port;
        }
        if let Ok(key) = env::var("CRASH_CLAIM_SIGNING_KEY") {
            config.settlement.claim_signing_key = Some(key);
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save(config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to write to {}: {}", path, e)).into()
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigurationError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigurationError::InvalidValue {
                field: name.to_string(),
                value: raw,
                reason: "could not parse".to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::testing().validate().is_ok());
        assert!(EngineConfig::production().validate().is_ok());
    }

    #[test]
    fn test_invalid_game_config() {
        let mut config = EngineConfig::default();
        config.game.instant_crash_probability = 1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.game.min_bet = config.game.max_bet + 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.game.max_multiplier = Multiplier::ONE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.countdown(), Duration::from_secs(3));
        assert_eq!(config.game.betting_duration_secs, 15);
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_save_and_load_config() -> EngineResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let path = path.to_str().unwrap();

        let mut original = EngineConfig::default();
        original.game.betting_duration_secs = 20;
        ConfigLoader::save(&original, path)?;

        let loaded = ConfigLoader::new().with_path(path).load()?;
        assert_eq!(loaded.game.betting_duration_secs, 20);
        assert_eq!(loaded.game.max_multiplier, original.game.max_multiplier);
        Ok(())
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [game]
            game_enabled = false
            min_bet = 1
            max_bet = 10
            betting_duration_secs = 5
            max_multiplier = 5000
            instant_crash_probability = 0.0
            "#,
        )
        .unwrap();
        assert!(!config.game.game_enabled);
        assert_eq!(config.scheduler.countdown_secs, 3);
        assert_eq!(config.tickets.ttl_secs, 15 * 24 * 60 * 60);
    }
}
