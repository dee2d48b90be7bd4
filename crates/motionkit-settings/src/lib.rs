//! MotionKit Settings Crate
//!
//! Loads and validates runtime settings. The device graph itself is built in
//! code and never read from these files.

pub mod config;
pub mod error;

pub use config::{
    Config, HardwareSettings, LoggingSettings, SchedulerSettings, SimulationSettings,
};
pub use error::{SettingsError, SettingsResult};
