//! Hardware-linked positioner
//!
//! Drives its axes through a [`Transport`]. Every request is bounded by the
//! controller's I/O timeout; a timeout surfaces as
//! [`HardwareError::Timeout`](motionkit_core::HardwareError::Timeout) through
//! the normal failure path of the command.

use super::positioner::{
    apply_acceleration, apply_speed, plan_command, positioner_state, stop_device,
    POSITIONER_ACTIONS,
};
use super::{
    check_parameters, ready, wait_completion, Completion, Controller, ControllerBase, Outcome,
};
use crate::command::{Action, Command};
use crate::device::{ActiveMotion, Capability, Device};
use crate::lock::{ControllerGuard, ControllerLock};
use crate::transport::{with_timeout, Transport, TransportReply, TransportRequest};
use async_trait::async_trait;
use motionkit_core::{DispatchError, Error, HardwareError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Positioner backed by a hardware transport
pub struct LinkedPositioner {
    base: ControllerBase,
    transport: Arc<dyn Transport>,
    io_timeout: Duration,
}

impl LinkedPositioner {
    /// Registry kind identifier
    pub const KIND: &'static str = "LinkedPositioner";

    /// Create a controller talking through `transport`
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>, io_timeout: Duration) -> Self {
        Self {
            base: ControllerBase::new(name, Capability::Positioner),
            transport,
            io_timeout,
        }
    }

    /// Per-request I/O timeout
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    fn send(&self, request: TransportRequest) -> Completion {
        let transport = self.transport.clone();
        let timeout = self.io_timeout;
        Box::pin(async move {
            with_timeout(request.operation(), timeout, transport.execute(request)).await?;
            Ok(Outcome::Completed)
        })
    }

    fn configure_request(device: &Device) -> Result<TransportRequest> {
        let state = positioner_state(device)?;
        Ok(TransportRequest::Configure {
            axis: device.name().to_string(),
            speed: state.speed,
            acceleration: state.acceleration,
            deceleration: state.deceleration,
        })
    }
}

struct LinkedMove {
    motion: ActiveMotion,
    lock: ControllerLock,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    target: f64,
    speed: f64,
}

impl LinkedMove {
    /// Send the move and commit the target once acknowledged
    ///
    /// On a transport failure the motion is released when `self` drops, so
    /// the next refresh reads the position the hardware reports.
    async fn run(self) -> Result<Outcome> {
        let device = self.motion.device();
        let request = TransportRequest::MoveTo {
            axis: device.name().to_string(),
            position: self.target,
            speed: self.speed,
        };

        tokio::select! {
            _ = self.motion.cancelled() => return Ok(Outcome::Superseded),
            reply = with_timeout("move", self.timeout, self.transport.execute(request)) => {
                reply?;
            }
        }

        let guard = self.lock.acquire().await?;
        if self.motion.is_cancelled() {
            return Ok(Outcome::Superseded);
        }
        device.modify_positioner(&guard, |p| {
            p.current_position = self.target;
            p.velocity = 0.0;
        });
        Ok(Outcome::Completed)
    }
}

#[async_trait]
impl Controller for LinkedPositioner {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn supported_actions(&self) -> &'static [Action] {
        POSITIONER_ACTIONS
    }

    /// Also rejects device commands while the transport is down
    fn validate(&self, command: &Command) -> Result<()> {
        self.base.check_action(command, POSITIONER_ACTIONS)?;
        if !command.action.needs_device() {
            return check_parameters(command, None);
        }
        let device = self.base.require_device(command)?;
        if !self.transport.is_connected() {
            return Err(HardwareError::NotConnected {
                controller: self.name().to_string(),
            }
            .into());
        }
        check_parameters(command, Some(&device))
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
                let speed = positioner_state(&device)?.speed;
                let motion = LinkedMove {
                    motion: ActiveMotion::begin(device, guard),
                    lock: lock.clone(),
                    transport: self.transport.clone(),
                    timeout: self.io_timeout,
                    target: profile.target,
                    speed,
                };
                Ok(Box::pin(motion.run()))
            }
            Action::SetSpeed => {
                let device = self.base.require_device(command)?;
                apply_speed(command, &device, guard)?;
                Ok(self.send(Self::configure_request(&device)?))
            }
            Action::SetAcceleration => {
                let device = self.base.require_device(command)?;
                apply_acceleration(command, &device, guard)?;
                Ok(self.send(Self::configure_request(&device)?))
            }
            Action::Stop => {
                let device = self.base.require_device(command)?;
                stop_device(&device, guard);
                Ok(self.send(TransportRequest::Stop {
                    axis: device.name().to_string(),
                }))
            }
            Action::Wait => wait_completion(command),
            _ => Err(DispatchError::InvalidAction {
                action: command.action.to_string(),
                controller: self.name().to_string(),
            }
            .into()),
        }
    }

    async fn connect(&self) -> Result<()> {
        with_timeout("connect", self.io_timeout, self.transport.connect()).await?;
        tracing::info!("Controller {} connected", self.name());
        Ok(())
    }

    /// Query reported positions, skipping the refresh while a command holds
    /// the lock
    async fn refresh_states(&self, lock: &ControllerLock) -> Result<()> {
        if !self.transport.is_connected() {
            return Ok(());
        }
        let Some(guard) = lock.try_acquire() else {
            tracing::trace!("Controller {} busy, refresh skipped", self.name());
            return Ok(());
        };

        for device in self.devices() {
            if device.is_moving() {
                continue;
            }
            let request = TransportRequest::QueryPosition {
                axis: device.name().to_string(),
            };
            match with_timeout("query position", self.io_timeout, self.transport.execute(request))
                .await?
            {
                TransportReply::Position(position) => {
                    device.modify_positioner(&guard, |p| p.current_position = position);
                }
                TransportReply::Ack => {
                    return Err(Error::from(HardwareError::Transport {
                        reason: format!("no position reported for {}", device.name()),
                    }));
                }
            }
        }
        drop(guard);

        self.base.publish_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PositionerState;
    use crate::transport::LoopbackTransport;

    async fn linked(latency: Duration) -> (LinkedPositioner, Arc<LoopbackTransport>, ControllerLock) {
        let transport = Arc::new(LoopbackTransport::new());
        transport.set_latency(latency);
        let controller =
            LinkedPositioner::new("z-stage", transport.clone(), Duration::from_millis(200));
        controller
            .add_device(Arc::new(Device::positioner("z", PositionerState::default())))
            .unwrap();
        controller.connect().await.unwrap();
        (controller, transport, ControllerLock::new("z-stage"))
    }

    #[tokio::test]
    async fn test_move_commits_after_ack() {
        let (controller, transport, lock) = linked(Duration::ZERO).await;

        controller
            .execute_command(&Command::move_absolute("z", 4.0), &lock)
            .await
            .unwrap();

        assert_eq!(transport.position("z"), 4.0);
        let device = controller.device("z").unwrap();
        assert_eq!(device.positioner_state().unwrap().current_position, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_timeout_is_hardware_error() {
        let (controller, transport, lock) = linked(Duration::ZERO).await;
        transport.set_latency(Duration::from_secs(1));

        let err = controller
            .execute_command(&Command::move_absolute("z", 4.0), &lock)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("MoveAbsolute z"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_move_releases_axis() {
        let (controller, transport, lock) = linked(Duration::ZERO).await;
        transport.set_latency(Duration::from_secs(1));

        let err = controller
            .execute_command(&Command::move_absolute("z", 4.0), &lock)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let device = controller.device("z").unwrap();
        assert!(!device.is_moving());

        transport.set_latency(Duration::ZERO);
        transport.set_position("z", 7.0);
        controller.refresh_states(&lock).await.unwrap();
        assert_eq!(device.published().as_positioner().unwrap().current_position, 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_detached_move_releases_axis() {
        let (controller, transport, lock) = linked(Duration::ZERO).await;
        transport.inject_fault(HardwareError::Transport {
            reason: "link reset".to_string(),
        });

        let outcome = controller
            .execute_command(&Command::move_absolute("z", 4.0).detached(), &lock)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Detached);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!controller.device("z").unwrap().is_moving());
    }

    #[tokio::test]
    async fn test_refresh_reads_reported_position() {
        let (controller, transport, lock) = linked(Duration::ZERO).await;
        transport.set_position("z", -2.0);

        controller.refresh_states(&lock).await.unwrap();
        let device = controller.device("z").unwrap();
        assert_eq!(device.published().as_positioner().unwrap().current_position, -2.0);
    }

    #[tokio::test]
    async fn test_refresh_skips_busy_controller() {
        let (controller, transport, lock) = linked(Duration::ZERO).await;
        transport.set_position("z", 9.0);

        let _guard = lock.acquire().await.unwrap();
        controller.refresh_states(&lock).await.unwrap();
        let device = controller.device("z").unwrap();
        assert_eq!(device.positioner_state().unwrap().current_position, 0.0);
    }

    #[tokio::test]
    async fn test_disconnected_transport_rejects_commands() {
        let transport = Arc::new(LoopbackTransport::new());
        let controller = LinkedPositioner::new("z-stage", transport, Duration::from_millis(50));
        controller
            .add_device(Arc::new(Device::positioner("z", PositionerState::default())))
            .unwrap();

        let err = controller
            .execute_command(&Command::stop("z"), &ControllerLock::new("z-stage"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            Error::Hardware(HardwareError::NotConnected { .. })
        ));
    }
}
