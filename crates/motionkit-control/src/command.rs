//! Commands and command lines
//!
//! A [`Command`] is one action aimed at a device or controller. A
//! [`CommandLine`] is an ordered set of commands scheduled as one unit; the
//! scheduler does not start the next line before every awaited command of
//! the current one has finished.

use crate::device::Capability;
use motionkit_core::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of actions a controller can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Move to an absolute position. Parameters: `[position]`
    MoveAbsolute,
    /// Move by a relative offset. Parameters: `[offset]`
    MoveRelative,
    /// Set the cruise speed. Parameters: `[speed]`
    SetSpeed,
    /// Set ramp rates. Parameters: `[acceleration, deceleration?]`
    SetAcceleration,
    /// Stop the motion in flight
    Stop,
    /// Open a shutter
    ShutterOn,
    /// Close a shutter
    ShutterOff,
    /// Set shutter settling delays. Parameters: `[on_ms, off_ms]`
    SetShutterDelays,
    /// Pause. Parameters: `[seconds]`
    Wait,
}

impl Action {
    /// Every action, in declaration order
    pub const ALL: [Action; 9] = [
        Action::MoveAbsolute,
        Action::MoveRelative,
        Action::SetSpeed,
        Action::SetAcceleration,
        Action::Stop,
        Action::ShutterOn,
        Action::ShutterOff,
        Action::SetShutterDelays,
        Action::Wait,
    ];

    /// Action name
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::MoveAbsolute => "MoveAbsolute",
            Action::MoveRelative => "MoveRelative",
            Action::SetSpeed => "SetSpeed",
            Action::SetAcceleration => "SetAcceleration",
            Action::Stop => "Stop",
            Action::ShutterOn => "ShutterOn",
            Action::ShutterOff => "ShutterOff",
            Action::SetShutterDelays => "SetShutterDelays",
            Action::Wait => "Wait",
        }
    }

    /// Actions that a master runs as one synchronized batch across slaves
    pub fn is_synchronized(&self) -> bool {
        matches!(
            self,
            Action::MoveAbsolute | Action::MoveRelative | Action::ShutterOn | Action::ShutterOff
        )
    }

    /// Whether the action addresses a single device
    pub fn needs_device(&self) -> bool {
        !matches!(self, Action::Wait)
    }

    /// Capability of the controllers that handle the action
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Action::MoveAbsolute
            | Action::MoveRelative
            | Action::SetSpeed
            | Action::SetAcceleration => Some(Capability::Positioner),
            Action::ShutterOn | Action::ShutterOff | Action::SetShutterDelays => {
                Some(Capability::Shutter)
            }
            Action::Stop | Action::Wait => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown action: {}", s))
    }
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// What to do
    pub action: Action,
    /// Controller to route to; resolved from the device when absent
    pub target_controller: Option<String>,
    /// Device the action applies to
    pub target_device: Option<String>,
    /// Positional parameters
    pub parameters: Vec<f64>,
    /// Whether the line waits for this command to finish
    pub awaited: bool,
}

impl Command {
    /// Create an awaited command with no target and no parameters
    pub fn new(action: Action) -> Self {
        Self {
            action,
            target_controller: None,
            target_device: None,
            parameters: Vec::new(),
            awaited: true,
        }
    }

    /// `MoveAbsolute` for a device
    pub fn move_absolute(device: &str, position: f64) -> Self {
        Self::new(Action::MoveAbsolute)
            .on_device(device)
            .with_parameters([position])
    }

    /// `MoveRelative` for a device
    pub fn move_relative(device: &str, offset: f64) -> Self {
        Self::new(Action::MoveRelative)
            .on_device(device)
            .with_parameters([offset])
    }

    /// `SetSpeed` for a device
    pub fn set_speed(device: &str, speed: f64) -> Self {
        Self::new(Action::SetSpeed)
            .on_device(device)
            .with_parameters([speed])
    }

    /// `SetAcceleration` for a device
    pub fn set_acceleration(device: &str, acceleration: f64, deceleration: f64) -> Self {
        Self::new(Action::SetAcceleration)
            .on_device(device)
            .with_parameters([acceleration, deceleration])
    }

    /// `Stop` for a device
    pub fn stop(device: &str) -> Self {
        Self::new(Action::Stop).on_device(device)
    }

    /// `ShutterOn` for a device
    pub fn shutter_on(device: &str) -> Self {
        Self::new(Action::ShutterOn).on_device(device)
    }

    /// `ShutterOff` for a device
    pub fn shutter_off(device: &str) -> Self {
        Self::new(Action::ShutterOff).on_device(device)
    }

    /// `SetShutterDelays` for a device
    pub fn set_shutter_delays(device: &str, on_ms: f64, off_ms: f64) -> Self {
        Self::new(Action::SetShutterDelays)
            .on_device(device)
            .with_parameters([on_ms, off_ms])
    }

    /// `Wait` on a controller
    pub fn wait(controller: &str, seconds: f64) -> Self {
        Self::new(Action::Wait)
            .on_controller(controller)
            .with_parameters([seconds])
    }

    /// Target a device
    pub fn on_device(mut self, device: &str) -> Self {
        self.target_device = Some(device.to_string());
        self
    }

    /// Target a controller
    pub fn on_controller(mut self, controller: &str) -> Self {
        self.target_controller = Some(controller.to_string());
        self
    }

    /// Replace the parameters
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = f64>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    /// Do not wait for completion
    pub fn detached(mut self) -> Self {
        self.awaited = false;
        self
    }

    /// Finite parameter at `index`
    pub fn parameter(&self, index: usize) -> Result<f64, DispatchError> {
        let value = self
            .parameters
            .get(index)
            .copied()
            .ok_or_else(|| DispatchError::MissingParameter {
                action: self.action.to_string(),
                index,
            })?;
        if !value.is_finite() {
            return Err(DispatchError::InvalidParameter {
                action: self.action.to_string(),
                reason: format!("parameter #{} is not finite", index),
            });
        }
        Ok(value)
    }

    /// Optional finite parameter at `index`
    pub fn parameter_or(&self, index: usize, default: f64) -> Result<f64, DispatchError> {
        if index < self.parameters.len() {
            self.parameter(index)
        } else {
            Ok(default)
        }
    }

    /// Target device name
    pub fn device_name(&self) -> Result<&str, DispatchError> {
        self.target_device
            .as_deref()
            .ok_or_else(|| DispatchError::MissingTargetDevice {
                action: self.action.to_string(),
            })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)?;
        match (&self.target_device, &self.target_controller) {
            (Some(device), Some(controller)) => write!(f, " {}@{}", device, controller)?,
            (Some(device), None) => write!(f, " {}", device)?,
            (None, Some(controller)) => write!(f, " @{}", controller)?,
            (None, None) => {}
        }
        if !self.parameters.is_empty() {
            let params: Vec<String> = self.parameters.iter().map(|p| p.to_string()).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        if !self.awaited {
            write!(f, " (detached)")?;
        }
        Ok(())
    }
}

/// Ordered set of commands scheduled as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandLine {
    commands: Vec<Command>,
}

impl CommandLine {
    /// Create an empty line
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Builder-style append
    pub fn with(mut self, command: Command) -> Self {
        self.push(command);
        self
    }

    /// Commands in order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Iterate over the commands
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when the line has no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl From<Vec<Command>> for CommandLine {
    fn from(commands: Vec<Command>) -> Self {
        Self { commands }
    }
}

impl FromIterator<Command> for CommandLine {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CommandLine {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

impl<'a> IntoIterator for &'a CommandLine {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.commands.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor() {
        let cmd = Command::move_absolute("x", 10.0).on_controller("xy-stage");
        assert_eq!(cmd.to_string(), "MoveAbsolute x@xy-stage [10]");

        let cmd = Command::wait("master", 0.5).detached();
        assert_eq!(cmd.to_string(), "Wait @master [0.5] (detached)");
    }

    #[test]
    fn test_parameter_access() {
        let cmd = Command::set_acceleration("x", 200.0, f64::NAN);
        assert_eq!(cmd.parameter(0), Ok(200.0));
        assert!(matches!(
            cmd.parameter(1),
            Err(DispatchError::InvalidParameter { .. })
        ));
        assert_eq!(
            cmd.parameter(2),
            Err(DispatchError::MissingParameter {
                action: "SetAcceleration".to_string(),
                index: 2
            })
        );
        assert_eq!(cmd.parameter_or(2, 5.0), Ok(5.0));
    }

    #[test]
    fn test_missing_device() {
        let cmd = Command::new(Action::ShutterOn);
        assert_eq!(
            cmd.device_name(),
            Err(DispatchError::MissingTargetDevice {
                action: "ShutterOn".to_string()
            })
        );
    }

    #[test]
    fn test_action_classification() {
        assert!(Action::MoveRelative.is_synchronized());
        assert!(Action::ShutterOff.is_synchronized());
        assert!(!Action::SetSpeed.is_synchronized());
        assert!(!Action::Wait.needs_device());
        assert_eq!("shutteron".parse::<Action>(), Ok(Action::ShutterOn));
        assert!("Jog".parse::<Action>().is_err());
    }
}
