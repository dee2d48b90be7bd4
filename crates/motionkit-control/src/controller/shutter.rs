//! Shutter controllers
//!
//! [`SimulatedShutter`] waits for the settling delay of a switch before it
//! commits the new state. [`VirtualShutter`] switches instantly and records
//! the delay for preview timing.

use super::{
    ready, seconds_parameter, wait_completion, wait_duration, Completion, Controller,
    ControllerBase, Outcome, PlannedStep,
};
use crate::command::{Action, Command};
use crate::device::{ActiveMotion, Capability, Device};
use crate::lock::{ControllerGuard, ControllerLock};
use motionkit_core::{thread_safe_vec, DispatchError, Error, Result, ThreadSafeVec};
use std::time::Duration;

const SHUTTER_ACTIONS: &[Action] = &[
    Action::ShutterOn,
    Action::ShutterOff,
    Action::SetShutterDelays,
    Action::Stop,
    Action::Wait,
];

/// Settling delay of a switch to `on`
pub(crate) fn switch_delay(device: &Device, on: bool) -> Result<Duration> {
    let state = device
        .shutter_state()
        .ok_or_else(|| Error::other(format!("Device {} is not a shutter", device.name())))?;
    Ok(if on { state.delay_on } else { state.delay_off })
}

/// Parse `SetShutterDelays` parameters, given in milliseconds
pub(crate) fn shutter_delays(command: &Command) -> Result<(Duration, Duration)> {
    let on_ms = command.parameter(0)?;
    let off_ms = command.parameter_or(1, on_ms)?;
    Ok((
        seconds_parameter(command, "on delay", on_ms / 1000.0)?,
        seconds_parameter(command, "off delay", off_ms / 1000.0)?,
    ))
}

fn apply_delays(command: &Command, device: &Device, guard: &ControllerGuard) -> Result<()> {
    let (delay_on, delay_off) = shutter_delays(command)?;
    device.modify_shutter(guard, |s| {
        s.delay_on = delay_on;
        s.delay_off = delay_off;
    });
    Ok(())
}

pub(crate) fn is_switch_on(command: &Command) -> bool {
    command.action == Action::ShutterOn
}

/// Shutter that honours its settling delays
pub struct SimulatedShutter {
    base: ControllerBase,
}

impl SimulatedShutter {
    /// Registry kind identifier
    pub const KIND: &'static str = "SimulatedShutter";

    /// Create an empty simulated shutter controller
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: ControllerBase::new(name, Capability::Shutter),
        }
    }
}

async fn settle_and_switch(
    switching: ActiveMotion,
    lock: ControllerLock,
    delay: Duration,
    on: bool,
) -> Result<Outcome> {
    tokio::select! {
        _ = switching.cancelled() => return Ok(Outcome::Superseded),
        _ = tokio::time::sleep(delay) => {}
    }

    let guard = lock.acquire().await?;
    if switching.is_cancelled() {
        return Ok(Outcome::Superseded);
    }
    switching.device().modify_shutter(&guard, |s| s.is_on = on);
    Ok(Outcome::Completed)
}

#[async_trait::async_trait]
impl Controller for SimulatedShutter {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn supported_actions(&self) -> &'static [Action] {
        SHUTTER_ACTIONS
    }

    fn begin(
        &self,
        command: &Command,
        guard: &ControllerGuard,
        lock: &ControllerLock,
    ) -> Result<Completion> {
        self.validate(command)?;
        match command.action {
            Action::ShutterOn | Action::ShutterOff => {
                let device = self.base.require_device(command)?;
                let on = is_switch_on(command);
                let delay = switch_delay(&device, on)?;
                let switching = ActiveMotion::begin(device.clone(), guard);

                if delay.is_zero() {
                    device.modify_shutter(guard, |s| s.is_on = on);
                    return Ok(ready(Outcome::Completed));
                }
                Ok(Box::pin(settle_and_switch(switching, lock.clone(), delay, on)))
            }
            Action::SetShutterDelays => {
                apply_delays(command, &*self.base.require_device(command)?, guard)?;
                Ok(ready(Outcome::Completed))
            }
            Action::Stop => {
                self.base.require_device(command)?.cancel_motion();
                Ok(ready(Outcome::Completed))
            }
            Action::Wait => wait_completion(command),
            _ => Err(DispatchError::InvalidAction {
                action: command.action.to_string(),
                controller: self.name().to_string(),
            }
            .into()),
        }
    }
}

/// Instantaneous shutter for digital twins
pub struct VirtualShutter {
    base: ControllerBase,
    trajectory: ThreadSafeVec<PlannedStep>,
}

impl VirtualShutter {
    /// Registry kind identifier
    pub const KIND: &'static str = "VirtualShutter";

    /// Create an empty virtual shutter controller
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: ControllerBase::new(name, Capability::Shutter),
            trajectory: thread_safe_vec(),
        }
    }

    fn record(&self, device: Option<&str>, action: Action, duration: Duration) {
        self.trajectory.lock().push(PlannedStep {
            controller: self.base.name().to_string(),
            device: device.map(str::to_string),
            action,
            duration: duration.as_secs_f64(),
            profile: None,
        });
    }
}

#[async_trait::async_trait]
impl Controller for VirtualShutter {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn supported_actions(&self) -> &'static [Action] {
        SHUTTER_ACTIONS
    }

    fn begin(
        &self,
        command: &Command,
        guard: &ControllerGuard,
        _lock: &ControllerLock,
    ) -> Result<Completion> {
        self.validate(command)?;
        match command.action {
            Action::ShutterOn | Action::ShutterOff => {
                let device = self.base.require_device(command)?;
                let on = is_switch_on(command);
                let delay = switch_delay(&device, on)?;
                let switching = ActiveMotion::begin(device.clone(), guard);
                device.modify_shutter(guard, |s| s.is_on = on);
                drop(switching);
                self.record(Some(device.name()), command.action, delay);
            }
            Action::SetShutterDelays => {
                apply_delays(command, &*self.base.require_device(command)?, guard)?
            }
            Action::Stop => {
                self.base.require_device(command)?.cancel_motion();
            }
            Action::Wait => {
                let duration = wait_duration(command)?;
                self.record(None, Action::Wait, duration);
            }
            _ => {
                return Err(DispatchError::InvalidAction {
                    action: command.action.to_string(),
                    controller: self.name().to_string(),
                }
                .into())
            }
        }
        Ok(ready(Outcome::Completed))
    }

    fn drain_trajectory(&self) -> Vec<PlannedStep> {
        std::mem::take(&mut *self.trajectory.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ShutterState;
    use std::sync::Arc;

    fn shutter_with_delays(on_ms: u64, off_ms: u64) -> Arc<Device> {
        Arc::new(Device::shutter(
            "shutter",
            ShutterState {
                is_on: false,
                delay_on: Duration::from_millis(on_ms),
                delay_off: Duration::from_millis(off_ms),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_shutter_waits_for_delay() {
        let controller = SimulatedShutter::new("optics");
        let device = shutter_with_delays(200, 0);
        controller.add_device(device.clone()).unwrap();
        let lock = ControllerLock::new("optics");

        let started = tokio::time::Instant::now();
        controller
            .execute_command(&Command::shutter_on("shutter"), &lock)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(device.shutter_state().unwrap().is_on);

        controller
            .execute_command(&Command::shutter_off("shutter"), &lock)
            .await
            .unwrap();
        assert!(!device.shutter_state().unwrap().is_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_off_supersedes_pending_on() {
        let controller = SimulatedShutter::new("optics");
        let device = shutter_with_delays(500, 0);
        controller.add_device(device.clone()).unwrap();
        let lock = ControllerLock::new("optics");

        let guard = lock.acquire().await.unwrap();
        let pending_on = controller
            .begin(&Command::shutter_on("shutter"), &guard, &lock)
            .unwrap();
        drop(guard);
        let pending_on = tokio::spawn(pending_on);

        controller
            .execute_command(&Command::shutter_off("shutter"), &lock)
            .await
            .unwrap();

        assert_eq!(pending_on.await.unwrap().unwrap(), Outcome::Superseded);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!device.shutter_state().unwrap().is_on);
    }

    #[tokio::test]
    async fn test_virtual_shutter_records_delays() {
        let controller = VirtualShutter::new("optics");
        let device = shutter_with_delays(0, 0);
        controller.add_device(device.clone()).unwrap();
        let lock = ControllerLock::new("optics");

        controller
            .execute_command(&Command::set_shutter_delays("shutter", 40.0, 10.0), &lock)
            .await
            .unwrap();
        controller
            .execute_command(&Command::shutter_on("shutter"), &lock)
            .await
            .unwrap();

        assert!(device.shutter_state().unwrap().is_on);
        let steps = controller.drain_trajectory();
        assert_eq!(steps.len(), 1);
        assert!((steps[0].duration - 0.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_negative_delay_rejected() {
        let controller = VirtualShutter::new("optics");
        controller.add_device(shutter_with_delays(0, 0)).unwrap();
        let lock = ControllerLock::new("optics");

        let err = controller
            .execute_command(&Command::set_shutter_delays("shutter", -1.0, 0.0), &lock)
            .await
            .unwrap_err();
        assert!(err.is_dispatch_error());
    }

    #[tokio::test]
    async fn test_huge_delay_rejected() {
        let controller = SimulatedShutter::new("optics");
        let device = shutter_with_delays(5, 5);
        controller.add_device(device.clone()).unwrap();
        let lock = ControllerLock::new("optics");

        let err = controller
            .execute_command(&Command::set_shutter_delays("shutter", 1e25, 0.0), &lock)
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            Error::Dispatch(DispatchError::InvalidParameter { .. })
        ));
        assert_eq!(device.shutter_state().unwrap().delay_on, Duration::from_millis(5));

        let err = controller
            .execute_command(&Command::wait("optics", 1e20), &lock)
            .await
            .unwrap_err();
        assert!(err.is_dispatch_error());
    }
}
