//! In-code graph configuration
//!
//! ```rust,ignore
//! let registry = ControllerRegistry::builtin(ControllerOptions::default());
//! let manager = GraphBuilder::new(&registry)
//!     .controller("SimulatedPositioner", "x-stage")?
//!     .positioner("x-stage", "x", PositionerState::default())?
//!     .controller("Master", "master")?
//!     .slave("master", "x-stage")?
//!     .tool(ToolSpec::new(position_fn).axis('x', "x"))?
//!     .build();
//! ```

use crate::device::{Device, PositionerState, ShutterState};
use crate::manager::ControllerManager;
use crate::registry::ControllerRegistry;
use crate::tool::{PositionFn, ToolInformation};
use motionkit_core::{Bounds, Error, HardwareError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Description of the tool tracker, by device name
#[derive(Clone)]
pub struct ToolSpec {
    position_fn: PositionFn,
    axes: BTreeMap<char, String>,
    shutter: Option<String>,
    bounds: Bounds,
}

impl ToolSpec {
    /// Tool with no axes, no shutter and unbounded volume
    pub fn new(position_fn: PositionFn) -> Self {
        Self {
            position_fn,
            axes: BTreeMap::new(),
            shutter: None,
            bounds: Bounds::unbounded(),
        }
    }

    /// Track a positioner as axis `axis`
    pub fn axis(mut self, axis: char, device: &str) -> Self {
        self.axes.insert(axis, device.to_string());
        self
    }

    /// Track a shutter
    pub fn shutter(mut self, device: &str) -> Self {
        self.shutter = Some(device.to_string());
        self
    }

    /// Working volume
    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }
}

/// Builds a [`ControllerManager`] from code
pub struct GraphBuilder<'r> {
    registry: &'r ControllerRegistry,
    manager: ControllerManager,
}

impl<'r> GraphBuilder<'r> {
    /// Start an empty graph
    pub fn new(registry: &'r ControllerRegistry) -> Self {
        Self {
            registry,
            manager: ControllerManager::new(),
        }
    }

    /// Add a controller of `kind`
    pub fn controller(self, kind: &str, name: &str) -> Result<Self> {
        let controller = self.registry.create(kind, name)?;
        self.manager.add_controller(controller)?;
        Ok(self)
    }

    /// Add a positioner device to a controller
    pub fn positioner(self, controller: &str, name: &str, state: PositionerState) -> Result<Self> {
        self.device(controller, Device::positioner(name, state))
    }

    /// Add a shutter device to a controller
    pub fn shutter(self, controller: &str, name: &str, state: ShutterState) -> Result<Self> {
        self.device(controller, Device::shutter(name, state))
    }

    fn device(self, controller: &str, device: Device) -> Result<Self> {
        self.manager
            .controller(controller)?
            .add_device(Arc::new(device))?;
        Ok(self)
    }

    /// Make `slave` a slave of `master`
    pub fn slave(self, master: &str, slave: &str) -> Result<Self> {
        self.manager.attach_slave(master, slave)?;
        Ok(self)
    }

    /// Assign the tool tracker
    pub fn tool(self, spec: ToolSpec) -> Result<Self> {
        let find = |name: &str| {
            self.manager.find_device(name).ok_or_else(|| {
                Error::from(HardwareError::DeviceNotFound {
                    device: name.to_string(),
                })
            })
        };

        let mut axes = BTreeMap::new();
        for (axis, name) in &spec.axes {
            axes.insert(*axis, find(name)?);
        }
        let shutter = spec.shutter.as_deref().map(find).transpose()?;

        let tool = ToolInformation::new(spec.position_fn, axes, shutter, spec.bounds)?;
        self.manager.set_tool_information(Arc::new(tool));
        Ok(self)
    }

    /// Finish the graph
    pub fn build(self) -> ControllerManager {
        self.manager
    }
}
