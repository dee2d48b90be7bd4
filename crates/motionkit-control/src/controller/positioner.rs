//! Positioner controllers
//!
//! - [`SimulatedPositioner`] plays each move back in real time, sampling the
//!   planned profile at a fixed tick
//! - [`VirtualPositioner`] commits moves instantly and records the planned
//!   profile, for digital twins

use super::{
    ready, wait_completion, wait_duration, Completion, Controller, ControllerBase, Outcome,
    PlannedStep,
};
use crate::command::{Action, Command};
use crate::device::{ActiveMotion, Capability, Device, PositionerState};
use crate::kinematics::{plan_move, MotionProfile, MotionRequest};
use crate::lock::{ControllerGuard, ControllerLock};
use motionkit_core::{thread_safe_vec, DispatchError, Error, Result, ThreadSafeVec};
use std::time::Duration;

pub(crate) const POSITIONER_ACTIONS: &[Action] = &[
    Action::MoveAbsolute,
    Action::MoveRelative,
    Action::SetSpeed,
    Action::SetAcceleration,
    Action::Stop,
    Action::Wait,
];

fn invalid(command: &Command, reason: String) -> Error {
    DispatchError::InvalidParameter {
        action: command.action.to_string(),
        reason,
    }
    .into()
}

pub(crate) fn positioner_state(device: &Device) -> Result<PositionerState> {
    device.positioner_state().ok_or_else(|| {
        Error::other(format!("Device {} is not a positioner", device.name()))
    })
}

/// Target position of a move command, relative moves resolved against the
/// committed position
pub(crate) fn move_target(command: &Command, state: &PositionerState) -> Result<f64> {
    let value = command.parameter(0)?;
    match command.action {
        Action::MoveAbsolute => Ok(value),
        Action::MoveRelative => Ok(state.current_position + value),
        other => Err(Error::other(format!("{} is not a move", other))),
    }
}

/// Plan a move command from the device's committed state
pub(crate) fn plan_command(command: &Command, device: &Device) -> Result<MotionProfile> {
    let state = positioner_state(device)?;
    let target = move_target(command, &state)?;
    let profile = plan_move(&MotionRequest {
        start: state.current_position,
        start_velocity: state.velocity,
        target_speed: state.speed,
        acceleration: state.acceleration,
        deceleration: state.deceleration,
        target,
    })?;
    Ok(profile)
}

/// `SetSpeed` value, checked against the device limits
pub(crate) fn checked_speed(command: &Command, state: &PositionerState) -> Result<f64> {
    let speed = command.parameter(0)?;
    if speed <= 0.0 || speed > state.max_speed {
        return Err(invalid(
            command,
            format!("speed {} outside (0, {}]", speed, state.max_speed),
        ));
    }
    Ok(speed)
}

/// `SetAcceleration` values, checked against the device limits;
/// deceleration defaults to the acceleration
pub(crate) fn checked_acceleration(
    command: &Command,
    state: &PositionerState,
) -> Result<(f64, f64)> {
    let acceleration = command.parameter(0)?;
    let deceleration = command.parameter_or(1, acceleration)?;
    if acceleration <= 0.0 || acceleration > state.max_acceleration {
        return Err(invalid(
            command,
            format!(
                "acceleration {} outside (0, {}]",
                acceleration, state.max_acceleration
            ),
        ));
    }
    if deceleration <= 0.0 || deceleration > state.max_deceleration {
        return Err(invalid(
            command,
            format!(
                "deceleration {} outside (0, {}]",
                deceleration, state.max_deceleration
            ),
        ));
    }
    Ok((acceleration, deceleration))
}

pub(crate) fn apply_speed(command: &Command, device: &Device, guard: &ControllerGuard) -> Result<()> {
    let speed = checked_speed(command, &positioner_state(device)?)?;
    device.modify_positioner(guard, |p| p.speed = speed);
    Ok(())
}

pub(crate) fn apply_acceleration(
    command: &Command,
    device: &Device,
    guard: &ControllerGuard,
) -> Result<()> {
    let (acceleration, deceleration) = checked_acceleration(command, &positioner_state(device)?)?;
    device.modify_positioner(guard, |p| {
        p.acceleration = acceleration;
        p.deceleration = deceleration;
    });
    Ok(())
}

/// Cancel the device's motion and hold it where it is
pub(crate) fn stop_device(device: &Device, guard: &ControllerGuard) {
    device.cancel_motion();
    device.modify_positioner(guard, |p| p.velocity = 0.0);
}

/// Real-time simulated positioner
pub struct SimulatedPositioner {
    base: ControllerBase,
    tick: Duration,
}

impl SimulatedPositioner {
    /// Registry kind identifier
    pub const KIND: &'static str = "SimulatedPositioner";

    /// Create a controller sampling motions every `tick`
    pub fn new(name: impl Into<String>, tick: Duration) -> Self {
        Self {
            base: ControllerBase::new(name, Capability::Positioner),
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    /// Sampling interval of simulated motions
    pub fn tick(&self) -> Duration {
        self.tick
    }
}

/// Play a profile back in real time
///
/// Every sample is committed under a freshly acquired lock. The final target
/// is only committed while the motion is still live.
async fn play_profile(
    motion: ActiveMotion,
    lock: ControllerLock,
    profile: MotionProfile,
    tick: Duration,
) -> Result<Outcome> {
    let device = motion.device().clone();
    let started = tokio::time::Instant::now();
    let total = profile.total_time();

    loop {
        tokio::select! {
            _ = motion.cancelled() => return Ok(Outcome::Superseded),
            _ = tokio::time::sleep(tick) => {}
        }

        let guard = lock.acquire().await?;
        if motion.is_cancelled() {
            return Ok(Outcome::Superseded);
        }

        let t = started.elapsed().as_secs_f64();
        if t >= total {
            device.modify_positioner(&guard, |p| {
                p.current_position = profile.target;
                p.velocity = 0.0;
            });
            drop(motion);
            tracing::debug!("Device {} reached {:.4}", device.name(), profile.target);
            return Ok(Outcome::Completed);
        }

        device.modify_positioner(&guard, |p| {
            p.current_position = profile.position_at(t);
            p.velocity = profile.velocity_at(t);
        });
    }
}

#[async_trait::async_trait]
impl Controller for SimulatedPositioner {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn supported_actions(&self) -> &'static [Action] {
        POSITIONER_ACTIONS
    }

    fn begin(
        &self,
        command: &Command,
        guard: &ControllerGuard,
        lock: &ControllerLock,
    ) -> Result<Completion> {
        self.validate(command)?;
        match command.action {
            Action::MoveAbsolute | Action::MoveRelative => {
                let device = self.base.require_device(command)?;
                let profile = plan_command(command, &device)?;
                let motion = ActiveMotion::begin(device.clone(), guard);

                if profile.total_time() <= 0.0 {
                    device.modify_positioner(guard, |p| {
                        p.current_position = profile.target;
                        p.velocity = 0.0;
                    });
                    return Ok(ready(Outcome::Completed));
                }

                tracing::debug!(
                    "Device {} moving {:.4} -> {:.4} in {:.3}s",
                    device.name(),
                    profile.start,
                    profile.target,
                    profile.total_time()
                );
                Ok(Box::pin(play_profile(motion, lock.clone(), profile, self.tick)))
            }
            Action::SetSpeed => {
                apply_speed(command, &*self.base.require_device(command)?, guard)?;
                Ok(ready(Outcome::Completed))
            }
            Action::SetAcceleration => {
                apply_acceleration(command, &*self.base.require_device(command)?, guard)?;
                Ok(ready(Outcome::Completed))
            }
            Action::Stop => {
                stop_device(&*self.base.require_device(command)?, guard);
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

/// Digital-twin positioner that commits moves instantly
pub struct VirtualPositioner {
    base: ControllerBase,
    trajectory: ThreadSafeVec<PlannedStep>,
}

impl VirtualPositioner {
    /// Registry kind identifier
    pub const KIND: &'static str = "VirtualPositioner";

    /// Create an empty virtual positioner
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: ControllerBase::new(name, Capability::Positioner),
            trajectory: thread_safe_vec(),
        }
    }

    fn record(&self, device: Option<&str>, action: Action, duration: f64, profile: Option<MotionProfile>) {
        self.trajectory.lock().push(PlannedStep {
            controller: self.base.name().to_string(),
            device: device.map(str::to_string),
            action,
            duration,
            profile,
        });
    }
}

#[async_trait::async_trait]
impl Controller for VirtualPositioner {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn supported_actions(&self) -> &'static [Action] {
        POSITIONER_ACTIONS
    }

    fn begin(
        &self,
        command: &Command,
        guard: &ControllerGuard,
        _lock: &ControllerLock,
    ) -> Result<Completion> {
        self.validate(command)?;
        match command.action {
            Action::MoveAbsolute | Action::MoveRelative => {
                let device = self.base.require_device(command)?;
                let profile = plan_command(command, &device)?;
                let motion = ActiveMotion::begin(device.clone(), guard);
                device.modify_positioner(guard, |p| {
                    p.current_position = profile.target;
                    p.velocity = 0.0;
                });
                drop(motion);
                self.record(
                    Some(device.name()),
                    command.action,
                    profile.total_time(),
                    Some(profile),
                );
            }
            Action::SetSpeed => apply_speed(command, &*self.base.require_device(command)?, guard)?,
            Action::SetAcceleration => {
                apply_acceleration(command, &*self.base.require_device(command)?, guard)?
            }
            Action::Stop => stop_device(&*self.base.require_device(command)?, guard),
            Action::Wait => {
                let duration = wait_duration(command)?;
                self.record(None, Action::Wait, duration.as_secs_f64(), None);
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
    use crate::device::PositionerState;
    use std::sync::Arc;

    fn simulated() -> (SimulatedPositioner, ControllerLock, Arc<Device>) {
        let controller = SimulatedPositioner::new("stage", Duration::from_millis(10));
        let device = Arc::new(Device::positioner(
            "x",
            PositionerState::at(0.0, 100.0, 1000.0, 1000.0),
        ));
        controller.add_device(device.clone()).unwrap();
        (controller, ControllerLock::new("stage"), device)
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_move_reaches_target() {
        let (controller, lock, device) = simulated();

        let outcome = controller
            .execute_command(&Command::move_absolute("x", 25.0), &lock)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        let state = device.positioner_state().unwrap();
        assert_eq!(state.current_position, 25.0);
        assert_eq!(state.velocity, 0.0);
        assert!(!device.is_moving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_move_supersedes_first() {
        let (controller, lock, device) = simulated();

        let guard = lock.acquire().await.unwrap();
        let first = controller
            .begin(&Command::move_absolute("x", 50.0), &guard, &lock)
            .unwrap();
        drop(guard);
        let first = tokio::spawn(first);

        tokio::time::sleep(Duration::from_millis(55)).await;
        let second = controller
            .execute_command(&Command::move_absolute("x", -10.0), &lock)
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Outcome::Superseded);
        assert_eq!(second, Outcome::Completed);
        assert_eq!(device.positioner_state().unwrap().current_position, -10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_motion() {
        let (controller, lock, device) = simulated();

        controller
            .execute_command(&Command::move_absolute("x", 100.0).detached(), &lock)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller
            .execute_command(&Command::stop("x"), &lock)
            .await
            .unwrap();

        let state = device.positioner_state().unwrap();
        assert!(state.current_position > 0.0 && state.current_position < 100.0);
        assert_eq!(state.velocity, 0.0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(device.positioner_state().unwrap().current_position < 100.0);
    }

    #[tokio::test]
    async fn test_speed_limits_enforced() {
        let (controller, lock, device) = simulated();
        let err = controller
            .execute_command(&Command::set_speed("x", 1e6), &lock)
            .await
            .unwrap_err();
        assert!(err.is_dispatch_error());

        controller
            .execute_command(&Command::set_acceleration("x", 500.0, 250.0), &lock)
            .await
            .unwrap();
        let state = device.positioner_state().unwrap();
        assert_eq!((state.acceleration, state.deceleration), (500.0, 250.0));
    }

    #[tokio::test]
    async fn test_unsupported_action() {
        let (controller, lock, _) = simulated();
        let err = controller
            .execute_command(&Command::shutter_on("x"), &lock)
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            Error::Dispatch(DispatchError::InvalidAction { .. })
        ));
    }

    #[tokio::test]
    async fn test_virtual_move_is_instant_and_recorded() {
        let controller = VirtualPositioner::new("stage");
        let device = Arc::new(Device::positioner(
            "x",
            PositionerState::at(0.0, 200.0, 1000.0, 1000.0),
        ));
        controller.add_device(device.clone()).unwrap();
        let lock = ControllerLock::new("stage");

        controller
            .execute_command(&Command::move_relative("x", 50.0), &lock)
            .await
            .unwrap();
        controller
            .execute_command(&Command::wait("stage", 0.5), &lock)
            .await
            .unwrap();

        assert_eq!(device.positioner_state().unwrap().current_position, 50.0);
        let steps = controller.drain_trajectory();
        assert_eq!(steps.len(), 2);
        let profile = steps[0].profile.as_ref().unwrap();
        assert!((profile.peak_speed - 158.113_883).abs() < 1e-3);
        assert_eq!(steps[1].duration, 0.5);
        assert!(controller.drain_trajectory().is_empty());
    }
}
