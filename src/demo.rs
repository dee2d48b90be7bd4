//! Demo instrument
//!
//! A two-axis scanning stage with an optical shutter, coordinated by one
//! master, and a raster program that exposes a square patch.

use motionkit_control::{
    Command, CommandLine, ControllerManager, ControllerRegistry, GraphBuilder, MasterController,
    PositionerState, ShutterState, SimulatedPositioner, SimulatedShutter, ToolSpec,
};
use motionkit_core::{Bounds, Result, Vector3};
use std::sync::Arc;
use std::time::Duration;

/// Name of the coordinating master
pub const MASTER: &str = "master";

/// Half-width of the stage travel in mm
pub const TRAVEL: f64 = 50.0;

/// Build the demo instrument graph from simulated controllers
pub fn instrument(registry: &ControllerRegistry) -> Result<ControllerManager> {
    let axis = PositionerState::at(0.0, 40.0, 400.0, 400.0);
    let shutter = ShutterState {
        is_on: false,
        delay_on: Duration::from_millis(15),
        delay_off: Duration::from_millis(10),
    };

    let manager = GraphBuilder::new(registry)
        .controller(SimulatedPositioner::KIND, "x-stage")?
        .positioner("x-stage", "x", axis)?
        .controller(SimulatedPositioner::KIND, "y-stage")?
        .positioner("y-stage", "y", axis)?
        .controller(SimulatedShutter::KIND, "optics")?
        .shutter("optics", "shutter", shutter)?
        .controller(MasterController::KIND, MASTER)?
        .slave(MASTER, "x-stage")?
        .slave(MASTER, "y-stage")?
        .slave(MASTER, "optics")?
        .tool(
            ToolSpec::new(Arc::new(|axis: &dyn Fn(char) -> f64| {
                Vector3::new(axis('x'), axis('y'), 0.0)
            }))
            .axis('x', "x")
            .axis('y', "y")
            .shutter("shutter")
            .bounds(Bounds::new(
                Vector3::new(-TRAVEL, -TRAVEL, -1.0),
                Vector3::new(TRAVEL, TRAVEL, 1.0),
            )),
        )?
        .build();
    Ok(manager)
}

/// Serpentine raster over a `size` x `size` square centred on the origin
///
/// Each row is exposed with the shutter open; moves between rows run with
/// the shutter closed.
pub fn raster_program(size: f64, rows: usize) -> Vec<CommandLine> {
    let half = size / 2.0;
    let pitch = if rows > 1 {
        size / (rows - 1) as f64
    } else {
        0.0
    };

    let mut lines = vec![CommandLine::new()
        .with(Command::set_speed("x", 40.0))
        .with(Command::set_speed("y", 40.0))];

    for row in 0..rows {
        let y = -half + pitch * row as f64;
        let (from, to) = if row % 2 == 0 {
            (-half, half)
        } else {
            (half, -half)
        };
        lines.push(
            CommandLine::new()
                .with(Command::shutter_off("shutter"))
                .with(Command::move_absolute("x", from))
                .with(Command::move_absolute("y", y)),
        );
        lines.push(CommandLine::new().with(Command::shutter_on("shutter")));
        lines.push(CommandLine::new().with(Command::move_absolute("x", to)));
    }

    lines.push(
        CommandLine::new()
            .with(Command::shutter_off("shutter"))
            .with(Command::move_absolute("x", 0.0))
            .with(Command::move_absolute("y", 0.0)),
    );
    lines.push(CommandLine::new().with(Command::wait(MASTER, 0.1)));
    lines
}
