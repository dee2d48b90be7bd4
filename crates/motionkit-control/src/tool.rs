//! Tool tracking
//!
//! [`ToolInformation`] derives the 3D tool position from a set of positioner
//! axes through an injected position function, and tracks whether the tool
//! is outside its working volume and whether its shutter is open.
//!
//! The derived state is recomputed from the published device states, either
//! on demand through [`ToolInformation::recalculate`] or automatically once
//! [`ToolInformation::attach`] subscribes it to its devices' events.

use crate::device::{Capability, Device};
use motionkit_core::{
    Bounds, ConfigurationError, Error, EventDispatcher, HardwareError, Result, ToolEvent, Vector3,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maps axis positions to a tool position
///
/// The argument looks up the published position of an axis by its letter;
/// unknown axes read as zero.
pub type PositionFn = Arc<dyn Fn(&dyn Fn(char) -> f64) -> Vector3 + Send + Sync>;

/// Derived tool state
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolState {
    /// Tool position
    pub position: Vector3,
    /// Whether the position lies outside the working volume
    pub is_out_of_bounds: bool,
    /// Whether the shutter is open
    pub is_on: bool,
}

/// Derived tool position, bounds and shutter tracking
pub struct ToolInformation {
    position_fn: PositionFn,
    axes: BTreeMap<char, Arc<Device>>,
    shutter: Option<Arc<Device>>,
    bounds: Bounds,
    state: RwLock<ToolState>,
    events: EventDispatcher<ToolEvent>,
    shutdown: CancellationToken,
}

impl ToolInformation {
    /// Create a tool tracker
    ///
    /// Every axis must be a positioner and the shutter, if any, a shutter.
    pub fn new(
        position_fn: PositionFn,
        axes: BTreeMap<char, Arc<Device>>,
        shutter: Option<Arc<Device>>,
        bounds: Bounds,
    ) -> Result<Self> {
        for device in axes.values() {
            Self::check_capability(device, Capability::Positioner)?;
        }
        if let Some(device) = &shutter {
            Self::check_capability(device, Capability::Shutter)?;
        }

        let tool = Self {
            position_fn,
            axes,
            shutter,
            bounds,
            state: RwLock::new(ToolState::default()),
            events: EventDispatcher::default(),
            shutdown: CancellationToken::new(),
        };
        *tool.state.write() = tool.compute();
        Ok(tool)
    }

    fn check_capability(device: &Device, expected: Capability) -> Result<()> {
        let capability = device.capability();
        if capability == expected {
            return Ok(());
        }
        Err(ConfigurationError::IncompatibleDevice {
            device: device.name().to_string(),
            device_capability: capability.to_string(),
            controller: "tool".to_string(),
            accepted: expected.to_string(),
        }
        .into())
    }

    /// Rebuild the tracker against other devices
    ///
    /// `lookup` maps each tracked device to its replacement. The position
    /// function and bounds are shared with `self`.
    pub fn rebuild(&self, lookup: impl Fn(&Device) -> Option<Arc<Device>>) -> Result<Self> {
        let find = |device: &Device| {
            lookup(device).ok_or_else(|| {
                Error::from(HardwareError::DeviceNotFound {
                    device: device.name().to_string(),
                })
            })
        };

        let mut axes = BTreeMap::new();
        for (axis, device) in &self.axes {
            axes.insert(*axis, find(device)?);
        }
        let shutter = self.shutter.as_deref().map(find).transpose()?;
        Self::new(self.position_fn.clone(), axes, shutter, self.bounds)
    }

    fn compute(&self) -> ToolState {
        let read_axis = |axis: char| {
            self.axes
                .get(&axis)
                .and_then(|d| d.published().as_positioner().map(|p| p.current_position))
                .unwrap_or(0.0)
        };
        let position = (self.position_fn)(&read_axis);
        let is_on = self
            .shutter
            .as_ref()
            .and_then(|d| d.published().as_shutter().map(|s| s.is_on))
            .unwrap_or(false);

        ToolState {
            position,
            is_out_of_bounds: !self.bounds.contains(&position),
            is_on,
        }
    }

    /// Recompute the derived state from the published device states
    ///
    /// Emits one [`ToolEvent`] per changed field.
    pub fn recalculate(&self) -> ToolState {
        let next = self.compute();
        let previous = std::mem::replace(&mut *self.state.write(), next);

        if previous.position != next.position {
            self.events.publish(ToolEvent::PositionChanged(next.position));
        }
        if previous.is_out_of_bounds != next.is_out_of_bounds {
            if next.is_out_of_bounds {
                tracing::warn!("Tool left its working volume at {}", next.position);
            }
            self.events
                .publish(ToolEvent::OutOfBoundsChanged(next.is_out_of_bounds));
        }
        if previous.is_on != next.is_on {
            self.events.publish(ToolEvent::ShutterChanged(next.is_on));
        }
        next
    }

    /// Current derived state
    pub fn state(&self) -> ToolState {
        *self.state.read()
    }

    /// Current tool position
    pub fn position(&self) -> Vector3 {
        self.state.read().position
    }

    /// Whether the tool is outside its working volume
    pub fn is_out_of_bounds(&self) -> bool {
        self.state.read().is_out_of_bounds
    }

    /// Whether the shutter is open
    pub fn is_on(&self) -> bool {
        self.state.read().is_on
    }

    /// Working volume
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Tracked axes and their device names
    pub fn axes(&self) -> Vec<(char, String)> {
        self.axes
            .iter()
            .map(|(axis, device)| (*axis, device.name().to_string()))
            .collect()
    }

    /// Tracked shutter device name
    pub fn shutter_name(&self) -> Option<&str> {
        self.shutter.as_ref().map(|d| d.name())
    }

    /// Device tracked for `axis`
    pub fn axis_device(&self, axis: char) -> Option<Arc<Device>> {
        self.axes.get(&axis).cloned()
    }

    /// Subscribe to tool change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ToolEvent> {
        self.events.subscribe()
    }

    /// Recalculate on every event of the tracked devices
    ///
    /// Listener tasks hold only a weak reference and stop when the tracker is
    /// dropped.
    pub fn attach(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let devices = self.axes.values().chain(self.shutter.iter());
        devices
            .map(|device| {
                let rx = device.subscribe();
                let tool = Arc::downgrade(self);
                let shutdown = self.shutdown.clone();
                tokio::spawn(listen(tool, rx, shutdown))
            })
            .collect()
    }
}

async fn listen(
    tool: Weak<ToolInformation>,
    mut rx: broadcast::Receiver<motionkit_core::DeviceEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(_) | Err(RecvError::Lagged(_)) => match tool.upgrade() {
                Some(tool) => {
                    tool.recalculate();
                }
                None => break,
            },
            Err(RecvError::Closed) => break,
        }
    }
}

impl Drop for ToolInformation {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for ToolInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolInformation")
            .field("axes", &self.axes())
            .field("shutter", &self.shutter_name())
            .field("bounds", &self.bounds)
            .field("state", &self.state())
            .finish()
    }
}
