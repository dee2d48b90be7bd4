//! Master controller
//!
//! A [`MasterController`] owns slave controllers and their locks and
//! coordinates commands that span several of them:
//! - synchronized actions (moves and shutter switches) of one call form a
//!   single batch; the batch locks every implicated slave in name order,
//!   validates every command, starts them all, then releases all locks
//!   together. A batch that fails to start is rolled back before the locks
//!   are released
//! - every other action is dispatched individually to its slave
//!
//! The master's own lock serializes batch admission.

use crate::command::{Action, Command};
use crate::controller::{
    finish, wait_completion, Completion, Controller, ControllerBase, Outcome,
};
use crate::device::{Capability, Device, DeviceState};
use crate::lock::{acquire_ordered, ControllerGuard, ControllerLock};
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use motionkit_core::{
    thread_safe_rw_map, ConfigurationError, DispatchError, Error, HardwareError, Result,
    ThreadSafeRwMap,
};
use std::sync::Arc;

const MASTER_ACTIONS: &[Action] = &[Action::Wait];

/// Device state captured before a batch starts
struct Snapshot {
    device: Arc<Device>,
    state: DeviceState,
    generation: u64,
    slot: usize,
}

impl Snapshot {
    fn take(device: Arc<Device>, slot: usize) -> Self {
        Self {
            state: device.state(),
            generation: device.motion_generation(),
            device,
            slot,
        }
    }

    /// Put the state back and cancel any motion started since
    fn restore(&self, guard: &ControllerGuard) {
        if self.device.motion_generation() != self.generation {
            self.device.cancel_motion();
        }
        self.device.modify(guard, |state| *state = self.state);
    }
}

/// Controller coordinating a set of slave controllers
pub struct MasterController {
    base: ControllerBase,
    slaves: ThreadSafeRwMap<String, Arc<dyn Controller>>,
    slave_locks: ThreadSafeRwMap<String, ControllerLock>,
}

impl MasterController {
    /// Registry kind identifier
    pub const KIND: &'static str = "Master";

    /// Create a master without slaves
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: ControllerBase::new(name, Capability::Coordinator),
            slaves: thread_safe_rw_map(),
            slave_locks: thread_safe_rw_map(),
        }
    }

    /// Register a slave together with its lock
    pub fn add_slave_controller(
        &self,
        controller: Arc<dyn Controller>,
        lock: ControllerLock,
    ) -> Result<()> {
        self.add_slave(controller)?;
        self.set_slave_lock(lock);
        Ok(())
    }

    /// Register a slave; its lock must be provided with
    /// [`set_slave_lock`](Self::set_slave_lock) before dispatch
    pub fn add_slave(&self, controller: Arc<dyn Controller>) -> Result<()> {
        let name = controller.name().to_string();
        if name == self.name() {
            return Err(ConfigurationError::InvalidValue {
                subject: name,
                reason: "a master cannot be its own slave".to_string(),
            }
            .into());
        }
        if let Some(master) = controller.master() {
            if master != self.name() {
                return Err(ConfigurationError::AlreadyEnslaved {
                    slave: name,
                    master,
                }
                .into());
            }
        }

        let mut slaves = self.slaves.write();
        if slaves.contains_key(&name) {
            return Err(ConfigurationError::DuplicateName {
                scope: "slave".to_string(),
                name,
            }
            .into());
        }
        controller.set_master(Some(self.name().to_string()));
        tracing::debug!("Controller {} is now a slave of {}", name, self.name());
        slaves.insert(name, controller);
        Ok(())
    }

    /// Register the lock of a slave, keyed by the lock's controller name
    pub fn set_slave_lock(&self, lock: ControllerLock) {
        self.slave_locks.write().insert(lock.name().to_string(), lock);
    }

    /// Slave names in lock order
    pub fn slave_names(&self) -> Vec<String> {
        self.slaves.read().keys().cloned().collect()
    }

    /// Slave by name
    pub fn slave(&self, name: &str) -> Option<Arc<dyn Controller>> {
        self.slaves.read().get(name).cloned()
    }

    /// Lock of a slave
    pub fn slave_lock(&self, name: &str) -> Result<ControllerLock> {
        self.slave_locks.read().get(name).cloned().ok_or_else(|| {
            Error::from(ConfigurationError::MissingLock {
                controller: name.to_string(),
            })
        })
    }

    /// Take every slave lock in name order
    ///
    /// Observers holding these guards see no batch half-applied.
    pub async fn lock_slaves(&self) -> Result<Vec<ControllerGuard>> {
        let locks = self
            .slave_names()
            .iter()
            .map(|name| self.slave_lock(name))
            .collect::<Result<Vec<_>>>()?;
        acquire_ordered(locks).await
    }

    /// Slave that handles `command`; `None` when the master handles it itself
    pub fn resolve(&self, command: &Command) -> Result<Option<Arc<dyn Controller>>> {
        if let Some(target) = command.target_controller.as_deref() {
            if target != self.name() {
                return self.slave(target).map(Some).ok_or_else(|| {
                    Error::from(ConfigurationError::UnknownController {
                        name: target.to_string(),
                    })
                });
            }
        }
        if !command.action.needs_device() {
            return Ok(None);
        }

        let device = command.device_name()?;
        self.slaves
            .read()
            .values()
            .find(|slave| slave.device(device).is_some())
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                Error::from(HardwareError::DeviceNotFound {
                    device: device.to_string(),
                })
            })
    }

    /// Execute a set of commands across the slaves
    ///
    /// Commands are grouped by action in order of first appearance. All
    /// synchronized commands start together as one batch at the position of
    /// the first synchronized group. Returns one outcome per command, in the
    /// order of `commands`, once every awaited command has finished.
    pub async fn execute_slave_commands(
        &self,
        commands: &[Command],
        lock: &ControllerLock,
    ) -> Result<Vec<Outcome>> {
        let mut groups: Vec<(Action, Vec<usize>)> = Vec::new();
        for (index, command) in commands.iter().enumerate() {
            match groups.iter_mut().find(|(action, _)| *action == command.action) {
                Some((_, group)) => group.push(index),
                None => groups.push((command.action, vec![index])),
            }
        }

        let synchronized: Vec<usize> = groups
            .iter()
            .filter(|(action, _)| action.is_synchronized())
            .flat_map(|(_, group)| group.iter().copied())
            .collect();

        let mut outcomes: Vec<Option<Outcome>> = vec![None; commands.len()];
        let mut pending: Vec<BoxFuture<'static, Result<(usize, Outcome)>>> = Vec::new();
        let mut batch_started = false;

        for (action, group) in &groups {
            if action.is_synchronized() {
                if !batch_started {
                    batch_started = true;
                    let batch: Vec<&Command> =
                        synchronized.iter().map(|&i| &commands[i]).collect();
                    let started = self.start_batch(&batch, lock).await?;
                    for (&index, completion) in synchronized.iter().zip(started) {
                        let command = &commands[index];
                        if command.awaited {
                            let descriptor = command.to_string();
                            pending.push(Box::pin(async move {
                                let outcome =
                                    completion.await.map_err(|e| e.in_command(descriptor))?;
                                Ok((index, outcome))
                            }));
                        } else {
                            outcomes[index] = Some(finish(command, completion).await?);
                        }
                    }
                }
                continue;
            }

            let results =
                try_join_all(group.iter().map(|&index| self.dispatch_one(&commands[index]))).await?;
            for (&index, outcome) in group.iter().zip(results) {
                outcomes[index] = Some(outcome);
            }
        }

        for (index, outcome) in try_join_all(pending).await? {
            outcomes[index] = Some(outcome);
        }
        Ok(outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(Outcome::Completed))
            .collect())
    }

    /// Start every synchronized command under all implicated slave locks
    ///
    /// Every command is validated, parameters and kinematics included, before
    /// the first one starts. Should a start still fail, the devices of the
    /// batch are restored to their state before the batch and the motions it
    /// started are cancelled. Completions are returned in command order.
    async fn start_batch(
        &self,
        commands: &[&Command],
        lock: &ControllerLock,
    ) -> Result<Vec<Completion>> {
        let mut resolved = Vec::with_capacity(commands.len());
        for command in commands {
            let slave = self
                .resolve(command)
                .and_then(|slave| {
                    slave.ok_or_else(|| {
                        Error::from(DispatchError::InvalidAction {
                            action: command.action.to_string(),
                            controller: self.name().to_string(),
                        })
                    })
                })
                .map_err(|e| e.in_command(command.to_string()))?;
            let slave_lock = self
                .slave_lock(slave.name())
                .map_err(|e| e.in_command(command.to_string()))?;
            resolved.push((*command, slave, slave_lock));
        }

        let admission = lock.acquire().await?;
        let guards = acquire_ordered(resolved.iter().map(|(_, _, l)| l.clone())).await?;

        for (command, slave, _) in &resolved {
            slave
                .validate(command)
                .map_err(|e| e.in_command(command.to_string()))?;
        }

        let mut snapshots: Vec<Snapshot> = Vec::with_capacity(resolved.len());
        let mut slots = Vec::with_capacity(resolved.len());
        for (command, slave, slave_lock) in &resolved {
            let slot = guards
                .iter()
                .position(|g| g.controller() == slave_lock.name())
                .ok_or_else(|| {
                    Error::from(ConfigurationError::MissingLock {
                        controller: slave.name().to_string(),
                    })
                })?;
            slots.push(slot);

            let device = command
                .device_name()
                .ok()
                .and_then(|name| slave.device(name));
            if let Some(device) = device {
                if !snapshots.iter().any(|s| Arc::ptr_eq(&s.device, &device)) {
                    snapshots.push(Snapshot::take(device, slot));
                }
            }
        }

        let mut started = Vec::with_capacity(resolved.len());
        for ((command, slave, slave_lock), &slot) in resolved.iter().zip(&slots) {
            match slave.begin(command, &guards[slot], slave_lock) {
                Ok(completion) => started.push(completion),
                Err(error) => {
                    for snapshot in &snapshots {
                        snapshot.restore(&guards[snapshot.slot]);
                    }
                    drop(started);
                    tracing::warn!(
                        "Master {} rolled back a batch of {} command(s) after [{}] failed: {}",
                        self.name(),
                        resolved.len(),
                        command,
                        error
                    );
                    return Err(error.in_command(command.to_string()));
                }
            }
        }

        drop(guards);
        drop(admission);
        tracing::debug!(
            "Master {} started a batch of {} command(s)",
            self.name(),
            started.len()
        );
        Ok(started)
    }

    async fn dispatch_one(&self, command: &Command) -> Result<Outcome> {
        let slave = self
            .resolve(command)
            .map_err(|e| e.in_command(command.to_string()))?;
        match slave {
            Some(slave) => {
                let slave_lock = self
                    .slave_lock(slave.name())
                    .map_err(|e| e.in_command(command.to_string()))?;
                slave.execute_command(command, &slave_lock).await
            }
            None => {
                let completion = self
                    .begin_own(command)
                    .map_err(|e| e.in_command(command.to_string()))?;
                finish(command, completion).await
            }
        }
    }

    fn begin_own(&self, command: &Command) -> Result<Completion> {
        self.base.check_action(command, MASTER_ACTIONS)?;
        wait_completion(command)
    }
}

#[async_trait]
impl Controller for MasterController {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn supported_actions(&self) -> &'static [Action] {
        MASTER_ACTIONS
    }

    fn begin(
        &self,
        command: &Command,
        _guard: &ControllerGuard,
        _lock: &ControllerLock,
    ) -> Result<Completion> {
        self.begin_own(command)
    }

    /// Route the command through the slave dispatch path
    async fn execute_command(&self, command: &Command, lock: &ControllerLock) -> Result<Outcome> {
        let outcomes = self
            .execute_slave_commands(std::slice::from_ref(command), lock)
            .await?;
        Ok(outcomes.into_iter().next().unwrap_or(Outcome::Completed))
    }

    fn as_master(&self) -> Option<&MasterController> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{SimulatedPositioner, VirtualPositioner, VirtualShutter};
    use crate::device::{PositionerState, ShutterState};
    use std::time::Duration;

    /// Positioner whose starts always fail after validation
    struct Jammed {
        base: ControllerBase,
    }

    #[async_trait]
    impl Controller for Jammed {
        fn base(&self) -> &ControllerBase {
            &self.base
        }

        fn kind(&self) -> &'static str {
            "Jammed"
        }

        fn supported_actions(&self) -> &'static [Action] {
            &[Action::MoveAbsolute]
        }

        fn begin(
            &self,
            _command: &Command,
            _guard: &ControllerGuard,
            _lock: &ControllerLock,
        ) -> Result<Completion> {
            Err(HardwareError::Transport {
                reason: "axis jammed".to_string(),
            }
            .into())
        }
    }

    fn stage(name: &str, axis: &str) -> Arc<dyn Controller> {
        let controller = VirtualPositioner::new(name);
        controller
            .add_device(Arc::new(Device::positioner(
                axis,
                PositionerState::at(0.0, 50.0, 500.0, 500.0),
            )))
            .unwrap();
        Arc::new(controller)
    }

    #[test]
    fn test_slave_registration() {
        let master = MasterController::new("master");
        let x = stage("x-stage", "x");
        master
            .add_slave_controller(x.clone(), ControllerLock::new("x-stage"))
            .unwrap();
        assert_eq!(x.master().as_deref(), Some("master"));

        let err = master
            .add_slave_controller(x.clone(), ControllerLock::new("x-stage"))
            .unwrap_err();
        assert!(err.is_configuration_error());

        let other = MasterController::new("other");
        let err = other.add_slave(x).unwrap_err();
        assert_eq!(
            err,
            Error::Configuration(ConfigurationError::AlreadyEnslaved {
                slave: "x-stage".to_string(),
                master: "master".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_missing_slave_lock_is_configuration_error() {
        let master = MasterController::new("master");
        master.add_slave(stage("x-stage", "x")).unwrap();

        let err = master
            .execute_slave_commands(
                &[Command::move_absolute("x", 1.0)],
                &ControllerLock::new("master"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            Error::Configuration(ConfigurationError::MissingLock { .. })
        ));
    }

    #[tokio::test]
    async fn test_mixed_batch() {
        let master = MasterController::new("master");
        master
            .add_slave_controller(stage("x-stage", "x"), ControllerLock::new("x-stage"))
            .unwrap();
        let optics = VirtualShutter::new("optics");
        optics
            .add_device(Arc::new(Device::shutter("shutter", ShutterState::default())))
            .unwrap();
        master
            .add_slave_controller(Arc::new(optics), ControllerLock::new("optics"))
            .unwrap();

        let commands = vec![
            Command::set_speed("x", 20.0),
            Command::move_absolute("x", 5.0),
            Command::shutter_on("shutter"),
            Command::wait("master", 0.0),
        ];
        let outcomes = master
            .execute_slave_commands(&commands, &ControllerLock::new("master"))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| *o == Outcome::Completed));

        let x = master.slave("x-stage").unwrap().device("x").unwrap();
        let state = x.positioner_state().unwrap();
        assert_eq!((state.speed, state.current_position), (20.0, 5.0));
    }

    #[tokio::test]
    async fn test_outcomes_follow_command_order() {
        let master = MasterController::new("master");
        master
            .add_slave_controller(stage("x-stage", "x"), ControllerLock::new("x-stage"))
            .unwrap();
        let optics = VirtualShutter::new("optics");
        optics
            .add_device(Arc::new(Device::shutter("shutter", ShutterState::default())))
            .unwrap();
        master
            .add_slave_controller(Arc::new(optics), ControllerLock::new("optics"))
            .unwrap();

        let commands = vec![
            Command::move_absolute("x", 5.0),
            Command::shutter_on("shutter").detached(),
            Command::set_speed("x", 20.0),
        ];
        let outcomes = master
            .execute_slave_commands(&commands, &ControllerLock::new("master"))
            .await
            .unwrap();
        assert_eq!(
            outcomes,
            vec![Outcome::Completed, Outcome::Detached, Outcome::Completed]
        );
    }

    #[tokio::test]
    async fn test_invalid_parameter_rejects_whole_batch() {
        let master = MasterController::new("master");
        master
            .add_slave_controller(stage("x-stage", "x"), ControllerLock::new("x-stage"))
            .unwrap();
        master
            .add_slave_controller(stage("y-stage", "y"), ControllerLock::new("y-stage"))
            .unwrap();

        let commands = vec![
            Command::move_absolute("x", 10.0),
            Command::new(Action::MoveAbsolute).on_device("y"),
        ];
        let err = master
            .execute_slave_commands(&commands, &ControllerLock::new("master"))
            .await
            .unwrap_err();
        assert!(err.is_dispatch_error());

        let x = master.slave("x-stage").unwrap().device("x").unwrap();
        assert_eq!(x.positioner_state().unwrap().current_position, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_rolls_back_batch() {
        let master = MasterController::new("master");
        master
            .add_slave_controller(stage("x-stage", "x"), ControllerLock::new("x-stage"))
            .unwrap();
        let y_stage = SimulatedPositioner::new("y-stage", Duration::from_millis(5));
        let y = Arc::new(Device::positioner("y", PositionerState::default()));
        y_stage.add_device(y.clone()).unwrap();
        master
            .add_slave_controller(Arc::new(y_stage), ControllerLock::new("y-stage"))
            .unwrap();
        let jammed = Jammed {
            base: ControllerBase::new("z-stage", Capability::Positioner),
        };
        jammed
            .add_device(Arc::new(Device::positioner("z", PositionerState::default())))
            .unwrap();
        master
            .add_slave_controller(Arc::new(jammed), ControllerLock::new("z-stage"))
            .unwrap();

        let commands = vec![
            Command::move_absolute("x", 10.0),
            Command::move_absolute("y", 10.0),
            Command::move_absolute("z", 10.0),
        ];
        let err = master
            .execute_slave_commands(&commands, &ControllerLock::new("master"))
            .await
            .unwrap_err();
        assert!(err.is_hardware_error());

        let x = master.slave("x-stage").unwrap().device("x").unwrap();
        assert_eq!(x.positioner_state().unwrap().current_position, 0.0);
        assert!(!y.is_moving());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(y.positioner_state().unwrap().current_position, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let master = MasterController::new("master");
        master
            .add_slave_controller(stage("x-stage", "x"), ControllerLock::new("x-stage"))
            .unwrap();
        let err = master
            .execute_command(&Command::move_absolute("q", 1.0), &ControllerLock::new("master"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            Error::Hardware(HardwareError::DeviceNotFound { .. })
        ));
        assert!(err.to_string().starts_with("Command [MoveAbsolute q [1]]"));
    }
}
