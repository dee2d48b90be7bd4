//! Controller manager
//!
//! The [`ControllerManager`] is the registry of controllers and their locks.
//! It resolves devices to controllers, routes commands to the controller that
//! should receive them, and builds digital-twin copies of the whole graph.

use crate::command::Command;
use crate::controller::{Controller, PlannedStep};
use crate::device::{Capability, Device};
use crate::lock::ControllerLock;
use crate::registry::{ControllerRegistry, SubstitutionRules};
use crate::tool::ToolInformation;
use motionkit_core::{
    thread_safe_rw, thread_safe_rw_map, ConfigurationError, Error, HardwareError, Result,
    ThreadSafeRw, ThreadSafeRwMap,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Registry of controllers, their locks and the tool tracker
#[derive(Debug)]
pub struct ControllerManager {
    controllers: ThreadSafeRwMap<String, Arc<dyn Controller>>,
    locks: ThreadSafeRwMap<String, ControllerLock>,
    tool: ThreadSafeRw<Option<Arc<ToolInformation>>>,
}

impl Default for ControllerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self {
            controllers: thread_safe_rw_map(),
            locks: thread_safe_rw_map(),
            tool: thread_safe_rw(None),
        }
    }

    /// Register a controller and allocate its lock
    pub fn add_controller(&self, controller: Arc<dyn Controller>) -> Result<ControllerLock> {
        let name = controller.name().to_string();
        let mut controllers = self.controllers.write();
        if controllers.contains_key(&name) {
            return Err(ConfigurationError::DuplicateName {
                scope: "controller".to_string(),
                name,
            }
            .into());
        }

        let lock = ControllerLock::new(name.as_str());
        tracing::debug!("Registered controller {} ({})", name, controller.kind());
        controllers.insert(name.clone(), controller);
        self.locks.write().insert(name, lock.clone());
        Ok(lock)
    }

    /// Controller by name
    pub fn controller(&self, name: &str) -> Result<Arc<dyn Controller>> {
        self.controllers.read().get(name).cloned().ok_or_else(|| {
            Error::from(ConfigurationError::UnknownController {
                name: name.to_string(),
            })
        })
    }

    /// Lock of a controller
    pub fn lock(&self, name: &str) -> Result<ControllerLock> {
        self.locks.read().get(name).cloned().ok_or_else(|| {
            Error::from(ConfigurationError::MissingLock {
                controller: name.to_string(),
            })
        })
    }

    /// Every controller in name order
    pub fn controllers(&self) -> Vec<Arc<dyn Controller>> {
        self.controllers.read().values().cloned().collect()
    }

    /// Registered controller names in name order
    pub fn controller_names(&self) -> Vec<String> {
        self.controllers.read().keys().cloned().collect()
    }

    /// Controller of `capability` owning the named device
    pub fn get_device_controller(
        &self,
        capability: Capability,
        device: &str,
    ) -> Result<Arc<dyn Controller>> {
        self.controllers
            .read()
            .values()
            .find(|c| c.capability() == capability && c.device(device).is_some())
            .cloned()
            .ok_or_else(|| {
                Error::from(HardwareError::DeviceNotFound {
                    device: device.to_string(),
                })
            })
    }

    /// Device by name, from whichever controller owns it
    pub fn find_device(&self, name: &str) -> Option<Arc<Device>> {
        self.controllers
            .read()
            .values()
            .find_map(|c| c.device(name))
    }

    /// Link a registered slave and its lock into a registered master
    pub fn attach_slave(&self, master: &str, slave: &str) -> Result<()> {
        let master_controller = self.controller(master)?;
        let coordinator = master_controller.as_master().ok_or_else(|| {
            Error::from(ConfigurationError::NotAMaster {
                name: master.to_string(),
            })
        })?;
        coordinator.add_slave_controller(self.controller(slave)?, self.lock(slave)?)
    }

    /// Name of the controller that should receive `command`
    ///
    /// Explicit targets win. Otherwise the device's owner is used, or its
    /// master when the owner is a slave.
    pub fn route(&self, command: &Command) -> Result<String> {
        if let Some(target) = command.target_controller.as_deref() {
            self.controller(target)?;
            return Ok(target.to_string());
        }

        let device = command.device_name()?;
        let owner = self
            .controllers
            .read()
            .values()
            .find(|c| c.device(device).is_some())
            .cloned()
            .ok_or_else(|| {
                Error::from(HardwareError::DeviceNotFound {
                    device: device.to_string(),
                })
            })?;
        Ok(owner.master().unwrap_or_else(|| owner.name().to_string()))
    }

    /// Assign the tool tracker
    pub fn set_tool_information(&self, tool: Arc<ToolInformation>) {
        *self.tool.write() = Some(tool);
    }

    /// The tool tracker, if assigned
    pub fn tool_information(&self) -> Option<Arc<ToolInformation>> {
        self.tool.read().clone()
    }

    /// Build a digital twin of the whole graph
    ///
    /// Pass one builds every controller (kind chosen by `rules`) with
    /// duplicated devices. Pass two re-wires master/slave links and rebuilds
    /// the tool tracker against the duplicates of its own devices, so equally
    /// named devices on different controllers never get mixed up. The twin
    /// shares no controller, device or lock with `self`.
    pub fn create_virtual_copy(
        &self,
        registry: &ControllerRegistry,
        rules: &SubstitutionRules,
    ) -> Result<ControllerManager> {
        let twin = ControllerManager::new();
        let mut duplicates: HashMap<Uuid, Arc<Device>> = HashMap::new();

        for original in self.controllers() {
            let kind = rules.kind_for(original.capability(), original.kind());
            let copy = registry.create(kind, original.name())?;
            for device in original.devices() {
                let duplicate = Arc::new(device.duplicate());
                copy.add_device(duplicate.clone())?;
                duplicates.insert(device.id(), duplicate);
            }
            twin.add_controller(copy)?;
        }

        for original in self.controllers() {
            if let Some(master) = original.as_master() {
                for slave in master.slave_names() {
                    twin.attach_slave(master.name(), &slave)?;
                }
            }
        }

        if let Some(tool) = self.tool_information() {
            let rebuilt = tool.rebuild(|device| duplicates.get(&device.id()).cloned())?;
            twin.set_tool_information(Arc::new(rebuilt));
        }

        tracing::debug!(
            "Created virtual copy with {} controller(s)",
            twin.controller_names().len()
        );
        Ok(twin)
    }

    /// Connect every controller
    pub async fn connect_all(&self) -> Result<()> {
        for controller in self.controllers() {
            controller.connect().await?;
        }
        Ok(())
    }

    /// Publish every controller's device states
    ///
    /// Every controller is refreshed even if one fails; the first error is
    /// returned.
    pub async fn refresh_states(&self) -> Result<()> {
        let mut first_error = None;
        for controller in self.controllers() {
            let lock = self.lock(controller.name())?;
            if let Err(e) = controller.refresh_states(&lock).await {
                tracing::warn!("Refreshing {} failed: {}", controller.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Cancel every motion in flight
    ///
    /// Returns the number of cancelled motions.
    pub async fn stop_all_motion(&self) -> Result<usize> {
        let mut stopped = 0;
        for controller in self.controllers() {
            let guard = self.lock(controller.name())?.acquire().await?;
            stopped += controller.halt(&guard);
        }
        if stopped > 0 {
            tracing::info!("Stopped {} motion(s)", stopped);
        }
        Ok(stopped)
    }

    /// Cancel the motions of the devices `commands` address
    ///
    /// Each device is resolved to its owner, an explicit target winning when
    /// it owns the device. Returns the number of cancelled motions.
    pub async fn halt_devices<'c>(
        &self,
        commands: impl IntoIterator<Item = &'c Command>,
    ) -> Result<usize> {
        let controllers = self.controllers();
        let mut targets: BTreeMap<String, Vec<Arc<Device>>> = BTreeMap::new();
        for command in commands {
            let Ok(name) = command.device_name() else {
                continue;
            };
            let target = command.target_controller.as_deref();
            let owner = controllers
                .iter()
                .filter(|c| c.device(name).is_some())
                .min_by_key(|c| target != Some(c.name()));
            let Some(owner) = owner else {
                continue;
            };
            let Some(device) = owner.device(name) else {
                continue;
            };
            let devices = targets.entry(owner.name().to_string()).or_default();
            if !devices.iter().any(|d| Arc::ptr_eq(d, &device)) {
                devices.push(device);
            }
        }

        let mut stopped = 0;
        for (controller, devices) in targets {
            let guard = self.lock(&controller)?.acquire().await?;
            for device in devices {
                if device.cancel_motion() {
                    stopped += 1;
                }
                device.modify_positioner(&guard, |p| p.velocity = 0.0);
            }
        }
        Ok(stopped)
    }

    /// Take the steps every controller recorded since the last call
    pub fn drain_trajectories(&self) -> Vec<PlannedStep> {
        self.controllers()
            .iter()
            .flat_map(|c| c.drain_trajectory())
            .collect()
    }
}
