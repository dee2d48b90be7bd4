//! # MotionKit
//!
//! Motion-control middleware for laboratory instruments built from
//! multi-axis positioning stages and optical shutters:
//! - scripted command lines executed in order with synchronized,
//!   cancellable motion across controllers
//! - master controllers that start multi-axis moves and shutter switches as
//!   one atomic batch
//! - digital-twin previews that replay a program on a virtual copy of the
//!   hardware graph before it touches real devices
//! - trapezoidal single-axis kinematics
//!
//! ## Architecture
//!
//! MotionKit is organized as a workspace with multiple crates:
//!
//! 1. **motionkit-core** - Errors, events, geometry, log sink
//! 2. **motionkit-control** - Devices, controllers, master, manager, tool, kinematics
//! 3. **motionkit-scheduler** - Command queue, command manager, preview
//! 4. **motionkit-settings** - Runtime settings
//! 5. **motionkit** - Logging setup, demo instrument and the command-line binary

pub mod demo;

pub use motionkit_core::{
    Bounds, ConfigurationError, DeviceEvent, DispatchError, Error, HardwareError,
    KinematicsError, LogLevel, LogRecord, LogSink, MemoryLogSink, Result, ToolEvent,
    TracingLogSink, Vector3,
};

pub use motionkit_control::{
    plan_move, Action, Capability, Command, CommandLine, Controller, ControllerManager,
    ControllerOptions, ControllerRegistry, Device, GraphBuilder, MasterController, MotionProfile,
    MotionRequest, Outcome, PositionerState, ShutterState, SubstitutionRules, ToolInformation,
    ToolSpec,
};

pub use motionkit_scheduler::{
    CommandManager, PreviewReport, PreviewRunner, RunState, SchedulerError, StateUpdater,
    ToolSample,
};

pub use motionkit_settings::{Config, LoggingSettings, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Controller timing derived from runtime settings
pub fn controller_options(config: &Config) -> ControllerOptions {
    ControllerOptions {
        simulation_tick: config.simulation.tick(),
        io_timeout: config.hardware.io_timeout(),
    }
}

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support, falling back to `settings.level`
/// - human-readable or JSON lines on stderr
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if settings.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_thread_names(true)
                    .with_line_number(true),
            )
            .try_init()?;
    }

    Ok(())
}
