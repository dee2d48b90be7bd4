//! Error handling for MotionKit
//!
//! Provides error types for every layer of the control stack:
//! - Configuration errors (graph setup, fatal and never auto-recovered)
//! - Dispatch errors (fatal to the one command that caused them)
//! - Hardware errors (I/O timeouts, checksum failures, missing devices)
//! - Kinematics errors (domain errors rejected before planning a move)
//!
//! Cancellation through motion supersession is not an error. Controllers
//! report it as an outcome instead.

use thiserror::Error;

/// Configuration error type
///
/// Raised while the controller/device graph is being assembled or when a
/// dispatch path discovers that the graph was wired inconsistently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A name is already registered in the same scope
    #[error("Duplicate {scope} name: {name}")]
    DuplicateName {
        /// What kind of registry rejected the name (controller, device, slave).
        scope: String,
        /// The duplicated name.
        name: String,
    },

    /// A controller was referenced without a registered lock
    #[error("No lock registered for controller {controller}")]
    MissingLock {
        /// The controller whose lock is missing.
        controller: String,
    },

    /// A device was offered to a controller of the wrong capability
    #[error("Device {device} ({device_capability}) is incompatible with controller {controller} ({accepted})")]
    IncompatibleDevice {
        /// The offered device.
        device: String,
        /// Capability of the offered device.
        device_capability: String,
        /// The receiving controller.
        controller: String,
        /// Capability the controller accepts.
        accepted: String,
    },

    /// A controller name is not registered
    #[error("Unknown controller: {name}")]
    UnknownController {
        /// The unknown controller name.
        name: String,
    },

    /// A controller kind has no factory in the registry
    #[error("Unknown controller kind: {kind}")]
    UnknownControllerKind {
        /// The unknown kind identifier.
        kind: String,
    },

    /// A master-only operation was attempted on a plain controller
    #[error("Controller {name} is not a master controller")]
    NotAMaster {
        /// The controller name.
        name: String,
    },

    /// A slave controller already belongs to another master
    #[error("Controller {slave} is already a slave of {master}")]
    AlreadyEnslaved {
        /// The slave controller.
        slave: String,
        /// Its current master.
        master: String,
    },

    /// A configuration value is out of its valid domain
    #[error("Invalid configuration for {subject}: {reason}")]
    InvalidValue {
        /// What was being configured.
        subject: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Dispatch error type
///
/// Represents failures to route a command to a handler. These are fatal to
/// the single command only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The controller has no handler for the action
    #[error("Action {action} is not supported by controller {controller}")]
    InvalidAction {
        /// The requested action.
        action: String,
        /// The controller that rejected it.
        controller: String,
    },

    /// A required positional parameter is missing
    #[error("Action {action} requires parameter #{index}")]
    MissingParameter {
        /// The requested action.
        action: String,
        /// Zero-based index of the missing parameter.
        index: usize,
    },

    /// A parameter value is invalid
    #[error("Invalid parameter for {action}: {reason}")]
    InvalidParameter {
        /// The requested action.
        action: String,
        /// Why the parameter was rejected.
        reason: String,
    },

    /// The action needs a target device but none was given
    #[error("Action {action} requires a target device")]
    MissingTargetDevice {
        /// The requested action.
        action: String,
    },
}

/// Hardware error type
///
/// Represents I/O level failures of hardware-backed controllers and device
/// lookups that found nothing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Operation did not finish within its I/O timeout
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Response failed its integrity check
    #[error("Checksum mismatch on {device}: expected {expected:#04x}, got {actual:#04x}")]
    Checksum {
        /// The device that sent the frame.
        device: String,
        /// Expected checksum.
        expected: u8,
        /// Received checksum.
        actual: u8,
    },

    /// No controller owns a device with the given name
    #[error("Device not found: {device}")]
    DeviceNotFound {
        /// The device name that was looked up.
        device: String,
    },

    /// The transport is not connected
    #[error("Transport for {controller} is not connected")]
    NotConnected {
        /// The controller owning the transport.
        controller: String,
    },

    /// Generic transport failure
    #[error("Transport error: {reason}")]
    Transport {
        /// The reason reported by the transport.
        reason: String,
    },
}

/// Kinematics domain error
///
/// Motion requests are validated before any profile is computed, so a zero
/// ramp rate can never reach a division.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum KinematicsError {
    /// Acceleration must be strictly positive
    #[error("Acceleration must be positive, got {0}")]
    NonPositiveAcceleration(f64),

    /// Deceleration must be strictly positive
    #[error("Deceleration must be positive, got {0}")]
    NonPositiveDeceleration(f64),

    /// Cruise speed must be strictly positive for a non-zero move
    #[error("Target speed must be positive, got {0}")]
    NonPositiveSpeed(f64),

    /// An input was NaN or infinite
    #[error("Motion input {0} is not finite")]
    NonFinite(&'static str),
}

/// Main error type for MotionKit
///
/// A unified error type that can represent any error from the control layers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration error
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Dispatch error
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Hardware error
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Kinematics error
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),

    /// An error raised while executing a specific command
    #[error("Command [{command}] failed: {source}")]
    Command {
        /// Descriptor of the failing command.
        command: String,
        /// The underlying error.
        source: Box<Error>,
    },

    /// A controller lock was closed while waiting on it
    #[error("Lock of controller {controller} is closed")]
    LockClosed {
        /// The controller whose lock closed.
        controller: String,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Attach a command descriptor, unless one is already attached
    pub fn in_command(self, command: impl Into<String>) -> Self {
        match self {
            Error::Command { .. } => self,
            other => Error::Command {
                command: command.into(),
                source: Box::new(other),
            },
        }
    }

    /// The error with any command descriptor removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Command { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Hardware(HardwareError::Timeout { .. }))
    }

    /// Check if this is a configuration error
    pub fn is_configuration_error(&self) -> bool {
        matches!(self.root(), Error::Configuration(_))
    }

    /// Check if this is a dispatch error
    pub fn is_dispatch_error(&self) -> bool {
        matches!(self.root(), Error::Dispatch(_))
    }

    /// Check if this is a hardware error
    pub fn is_hardware_error(&self) -> bool {
        matches!(self.root(), Error::Hardware(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_command_wraps_once() {
        let err = Error::from(HardwareError::Timeout {
            operation: "move".to_string(),
            timeout_ms: 200,
        });
        let wrapped = err.in_command("MoveAbsolute x@stage").in_command("outer");

        match &wrapped {
            Error::Command { command, .. } => assert_eq!(command, "MoveAbsolute x@stage"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(wrapped.is_timeout());
        assert!(wrapped.is_hardware_error());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::from(ConfigurationError::MissingLock {
            controller: "y-stage".to_string(),
        });
        assert_eq!(err.to_string(), "No lock registered for controller y-stage");
        assert!(err.is_configuration_error());

        let err = Error::from(KinematicsError::NonPositiveAcceleration(0.0));
        assert_eq!(err.to_string(), "Acceleration must be positive, got 0");
    }
}
