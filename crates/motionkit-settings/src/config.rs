//! Runtime configuration for MotionKit
//!
//! Configuration is organized into logical sections:
//! - Scheduler timing (state publication period)
//! - Simulation timing (motion sampling tick)
//! - Hardware I/O (per-request timeout)
//! - Logging (filter level, output format)
//!
//! Every field has a default, so partial files load.

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Period of device state publication in milliseconds
    pub refresh_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 50,
        }
    }
}

impl SchedulerSettings {
    /// State publication period
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Simulation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Sampling interval of simulated motions in milliseconds
    pub tick_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { tick_ms: 10 }
    }
}

impl SimulationSettings {
    /// Simulated motion sampling interval
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Hardware I/O settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSettings {
    /// Timeout of a single transport request in milliseconds
    pub io_timeout_ms: u64,
    /// Connect every controller at startup
    pub connect_on_start: bool,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            io_timeout_ms: 500,
            connect_on_start: true,
        }
    }
}

impl HardwareSettings {
    /// Transport request timeout
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler settings
    pub scheduler: SchedulerSettings,
    /// Simulation settings
    pub simulation: SimulationSettings,
    /// Hardware settings
    pub hardware: HardwareSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform config file location, e.g. `~/.config/motionkit/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("motionkit").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Load config from file (TOML or JSON)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = match extension(path)? {
            Format::Toml => toml::from_str(&content)?,
            Format::Json => serde_json::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Load config from file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (TOML or JSON), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match extension(path)? {
            Format::Toml => toml::to_string_pretty(self)?,
            Format::Json => serde_json::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.scheduler.refresh_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "scheduler.refresh_interval_ms",
                "must be > 0",
            ));
        }

        if self.simulation.tick_ms == 0 {
            return Err(SettingsError::invalid("simulation.tick_ms", "must be > 0"));
        }

        if self.hardware.io_timeout_ms == 0 {
            return Err(SettingsError::invalid("hardware.io_timeout_ms", "must be > 0"));
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(SettingsError::invalid(
                "logging.level",
                format!("expected one of {}", LEVELS.join(", ")),
            ));
        }

        Ok(())
    }
}

enum Format {
    Toml,
    Json,
}

fn extension(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.refresh_interval(), Duration::from_millis(50));
        assert_eq!(config.simulation.tick(), Duration::from_millis(10));
        assert_eq!(config.hardware.io_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_zero_and_unknown_level() {
        let mut config = Config::new();
        config.simulation.tick_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { ref key, .. }) if key == "simulation.tick_ms"
        ));

        let mut config = Config::new();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[simulation]\ntick_ms = 5\n").unwrap();
        assert_eq!(config.simulation.tick_ms, 5);
        assert_eq!(config.scheduler, SchedulerSettings::default());
        assert_eq!(config.logging.level, "info");
    }
}
