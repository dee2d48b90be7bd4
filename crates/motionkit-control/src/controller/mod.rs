//! Controllers
//!
//! A controller owns the devices of one capability and turns [`Command`]s into
//! device mutations. Execution is split in two steps:
//! - [`Controller::begin`] runs under the controller lock, validates the
//!   command, commits whatever must happen immediately (supersession of the
//!   previous motion, parameter updates) and returns a [`Completion`]
//! - the completion runs without holding the lock and re-acquires it for every
//!   state commit
//!
//! This split lets a master start a whole batch under several locks and
//! release them together before any motion finishes.

pub mod linked;
pub mod positioner;
pub mod shutter;

pub use linked::LinkedPositioner;
pub use positioner::{SimulatedPositioner, VirtualPositioner};
pub use shutter::{SimulatedShutter, VirtualShutter};

use crate::command::{Action, Command};
use crate::device::{Capability, Device};
use crate::kinematics::MotionProfile;
use crate::lock::{ControllerGuard, ControllerLock};
use crate::master::MasterController;
use async_trait::async_trait;
use futures::future::BoxFuture;
use motionkit_core::{
    thread_safe_rw_map, ConfigurationError, DispatchError, Error, HardwareError, Result,
    ThreadSafeRwMap,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Future finishing a started command
pub type Completion = BoxFuture<'static, Result<Outcome>>;

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Ran to completion and committed its final state
    Completed,
    /// Cancelled by a newer command for the same device
    Superseded,
    /// Started without waiting for completion
    Detached,
}

/// A step recorded by a virtual controller for preview timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    /// Controller that executed the step
    pub controller: String,
    /// Device the step applied to
    pub device: Option<String>,
    /// Executed action
    pub action: Action,
    /// Real-time duration the step would take, in seconds
    pub duration: f64,
    /// Motion profile for moves
    pub profile: Option<MotionProfile>,
}

/// Completion that is already done
pub fn ready(outcome: Outcome) -> Completion {
    Box::pin(futures::future::ready(Ok(outcome)))
}

/// Convert a parameter in seconds to a [`Duration`]
///
/// Negative and unrepresentably large values are dispatch errors.
pub fn seconds_parameter(command: &Command, what: &str, seconds: f64) -> Result<Duration> {
    if seconds < 0.0 {
        return Err(DispatchError::InvalidParameter {
            action: command.action.to_string(),
            reason: format!("{} must not be negative, got {}", what, seconds),
        }
        .into());
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        Error::from(DispatchError::InvalidParameter {
            action: command.action.to_string(),
            reason: format!("{} of {}s out of range: {}", what, seconds, e),
        })
    })
}

/// Validated `Wait` duration
pub fn wait_duration(command: &Command) -> Result<Duration> {
    seconds_parameter(command, "wait time", command.parameter(0)?)
}

/// Completion that sleeps for the `Wait` duration
pub fn wait_completion(command: &Command) -> Result<Completion> {
    let duration = wait_duration(command)?;
    Ok(Box::pin(async move {
        tokio::time::sleep(duration).await;
        Ok(Outcome::Completed)
    }))
}

/// Drive a completion according to the command's `awaited` flag
///
/// Detached completions run on their own task; their failures are logged and
/// never reach the caller.
pub async fn finish(command: &Command, completion: Completion) -> Result<Outcome> {
    if command.awaited {
        return completion
            .await
            .map_err(|e| e.in_command(command.to_string()));
    }

    let descriptor = command.to_string();
    tokio::spawn(async move {
        match completion.await {
            Ok(Outcome::Superseded) => {
                tracing::debug!("Detached command [{}] superseded", descriptor)
            }
            Ok(_) => tracing::debug!("Detached command [{}] completed", descriptor),
            Err(e) => tracing::error!("Detached command [{}] failed: {}", descriptor, e),
        }
    });
    Ok(Outcome::Detached)
}

/// Check the parameters of a command against the state of its device
///
/// Runs the parameter checks of `begin`, move planning included, without
/// changing any state.
pub fn check_parameters(command: &Command, device: Option<&Device>) -> Result<()> {
    match (command.action, device) {
        (Action::MoveAbsolute | Action::MoveRelative, Some(device)) => {
            positioner::plan_command(command, device)?;
        }
        (Action::SetSpeed, Some(device)) => {
            positioner::checked_speed(command, &positioner::positioner_state(device)?)?;
        }
        (Action::SetAcceleration, Some(device)) => {
            positioner::checked_acceleration(command, &positioner::positioner_state(device)?)?;
        }
        (Action::ShutterOn | Action::ShutterOff, Some(device)) => {
            shutter::switch_delay(device, shutter::is_switch_on(command))?;
        }
        (Action::SetShutterDelays, _) => {
            shutter::shutter_delays(command)?;
        }
        (Action::Wait, _) => {
            wait_duration(command)?;
        }
        _ => {}
    }
    Ok(())
}

/// State shared by every controller kind
#[derive(Debug)]
pub struct ControllerBase {
    name: String,
    accepts: Capability,
    master: RwLock<Option<String>>,
    devices: ThreadSafeRwMap<String, Arc<Device>>,
}

impl ControllerBase {
    /// Create an empty controller base
    pub fn new(name: impl Into<String>, accepts: Capability) -> Self {
        Self {
            name: name.into(),
            accepts,
            master: RwLock::new(None),
            devices: thread_safe_rw_map(),
        }
    }

    /// Controller name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability of the devices this controller accepts
    pub fn accepts(&self) -> Capability {
        self.accepts
    }

    /// Name of the owning master
    pub fn master(&self) -> Option<String> {
        self.master.read().clone()
    }

    /// Set or clear the owning master
    pub fn set_master(&self, master: Option<String>) {
        *self.master.write() = master;
    }

    /// Owned devices in name order
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().values().cloned().collect()
    }

    /// Owned device by name
    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.read().get(name).cloned()
    }

    /// Register a device
    pub fn add_device(&self, device: Arc<Device>) -> Result<()> {
        let capability = device.capability();
        if capability != self.accepts {
            return Err(ConfigurationError::IncompatibleDevice {
                device: device.name().to_string(),
                device_capability: capability.to_string(),
                controller: self.name.clone(),
                accepted: self.accepts.to_string(),
            }
            .into());
        }

        let mut devices = self.devices.write();
        if devices.contains_key(device.name()) {
            return Err(ConfigurationError::DuplicateName {
                scope: "device".to_string(),
                name: device.name().to_string(),
            }
            .into());
        }
        tracing::debug!("Controller {} owns device {}", self.name, device.name());
        devices.insert(device.name().to_string(), device);
        Ok(())
    }

    /// Reject actions outside `supported`
    pub fn check_action(&self, command: &Command, supported: &[Action]) -> Result<()> {
        if supported.contains(&command.action) {
            Ok(())
        } else {
            Err(DispatchError::InvalidAction {
                action: command.action.to_string(),
                controller: self.name.clone(),
            }
            .into())
        }
    }

    /// Device named by the command
    pub fn require_device(&self, command: &Command) -> Result<Arc<Device>> {
        let name = command.device_name()?;
        self.device(name).ok_or_else(|| {
            Error::from(HardwareError::DeviceNotFound {
                device: name.to_string(),
            })
        })
    }

    /// Publish every device state
    pub fn publish_all(&self) -> usize {
        self.devices().iter().map(|d| d.publish()).sum()
    }
}

/// Action dispatch contract shared by every controller kind
#[async_trait]
pub trait Controller: Send + Sync {
    /// Shared controller state
    fn base(&self) -> &ControllerBase;

    /// Registry kind identifier
    fn kind(&self) -> &'static str;

    /// Actions this controller handles
    fn supported_actions(&self) -> &'static [Action];

    /// Start a command while holding this controller's lock
    ///
    /// `lock` is the same lock `guard` was taken from; completions use it to
    /// re-acquire the lock for later commits.
    fn begin(
        &self,
        command: &Command,
        guard: &ControllerGuard,
        lock: &ControllerLock,
    ) -> Result<Completion>;

    /// Controller name, unique within a manager
    fn name(&self) -> &str {
        self.base().name()
    }

    /// Capability of the owned devices
    fn capability(&self) -> Capability {
        self.base().accepts()
    }

    /// Name of the owning master
    fn master(&self) -> Option<String> {
        self.base().master()
    }

    /// Set or clear the owning master
    fn set_master(&self, master: Option<String>) {
        self.base().set_master(master)
    }

    /// Owned devices
    fn devices(&self) -> Vec<Arc<Device>> {
        self.base().devices()
    }

    /// Owned device by name
    fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.base().device(name)
    }

    /// Register a device
    fn add_device(&self, device: Arc<Device>) -> Result<()> {
        self.base().add_device(device)
    }

    /// Check that a command can be started, without starting it
    ///
    /// Covers the action, the device and every parameter, including the
    /// kinematics of moves.
    fn validate(&self, command: &Command) -> Result<()> {
        self.base().check_action(command, self.supported_actions())?;
        let device = if command.action.needs_device() {
            Some(self.base().require_device(command)?)
        } else {
            None
        };
        check_parameters(command, device.as_deref())
    }

    /// Execute a command under `lock`
    ///
    /// Awaited commands return once finished. Detached commands return
    /// [`Outcome::Detached`] as soon as they have started.
    async fn execute_command(&self, command: &Command, lock: &ControllerLock) -> Result<Outcome> {
        let guard = lock
            .acquire()
            .await
            .map_err(|e| e.in_command(command.to_string()))?;
        let started = self.begin(command, &guard, lock);
        drop(guard);

        let completion = started.map_err(|e| e.in_command(command.to_string()))?;
        finish(command, completion).await
    }

    /// Open the hardware link
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Copy internal device state to the observable state
    async fn refresh_states(&self, _lock: &ControllerLock) -> Result<()> {
        self.base().publish_all();
        Ok(())
    }

    /// Cancel every motion in flight and zero the velocities
    fn halt(&self, guard: &ControllerGuard) -> usize {
        let mut stopped = 0;
        for device in self.devices() {
            if device.cancel_motion() {
                stopped += 1;
            }
            device.modify_positioner(guard, |p| p.velocity = 0.0);
        }
        stopped
    }

    /// Take the steps recorded since the last call
    fn drain_trajectory(&self) -> Vec<PlannedStep> {
        Vec::new()
    }

    /// Downcast to a master controller
    fn as_master(&self) -> Option<&MasterController> {
        None
    }
}

impl std::fmt::Debug for dyn Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PositionerState, ShutterState};

    #[test]
    fn test_add_device_rejects_wrong_capability() {
        let base = ControllerBase::new("stage", Capability::Positioner);
        let err = base
            .add_device(Arc::new(Device::shutter("s", ShutterState::default())))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::IncompatibleDevice { .. })
        ));
    }

    #[test]
    fn test_add_device_rejects_duplicate() {
        let base = ControllerBase::new("stage", Capability::Positioner);
        base.add_device(Arc::new(Device::positioner("x", PositionerState::default())))
            .unwrap();
        let err = base
            .add_device(Arc::new(Device::positioner("x", PositionerState::default())))
            .unwrap_err();
        assert_eq!(
            err,
            Error::Configuration(ConfigurationError::DuplicateName {
                scope: "device".to_string(),
                name: "x".to_string()
            })
        );
    }

    #[test]
    fn test_require_device() {
        let base = ControllerBase::new("stage", Capability::Positioner);
        let err = base
            .require_device(&Command::move_absolute("z", 1.0))
            .unwrap_err();
        assert!(err.is_hardware_error());
        assert!(base.check_action(&Command::shutter_on("z"), &[Action::Stop]).is_err());
    }

    #[test]
    fn test_negative_wait_rejected() {
        assert!(wait_duration(&Command::wait("m", -1.0)).is_err());
        assert_eq!(
            wait_duration(&Command::wait("m", 0.25)).unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_huge_wait_rejected() {
        let err = wait_duration(&Command::wait("m", 1e20)).unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::InvalidParameter { .. })
        ));
        assert!(wait_completion(&Command::wait("m", f64::MAX)).is_err());
    }
}
