//! Event system for device and tool change notifications
//!
//! Provides:
//! - Event types for device state and derived tool state changes
//! - A broadcast dispatcher for publishing events to subscribers

use crate::data::Vector3;
use tokio::sync::broadcast;

/// Device change notification
///
/// Emitted when a device's observable state is published and differs from the
/// previously published state.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Positioner position changed
    PositionChanged {
        /// Device name.
        device: String,
        /// New position in axis units.
        position: f64,
    },
    /// Positioner commanded speed or velocity changed
    SpeedChanged {
        /// Device name.
        device: String,
        /// New instantaneous signed velocity.
        velocity: f64,
    },
    /// Shutter open/closed state changed
    StateChanged {
        /// Device name.
        device: String,
        /// Whether the shutter is now open.
        is_on: bool,
    },
}

impl DeviceEvent {
    /// Name of the device that emitted the event
    pub fn device(&self) -> &str {
        match self {
            DeviceEvent::PositionChanged { device, .. }
            | DeviceEvent::SpeedChanged { device, .. }
            | DeviceEvent::StateChanged { device, .. } => device,
        }
    }
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::PositionChanged { device, position } => {
                write!(f, "{} position: {:.4}", device, position)
            }
            DeviceEvent::SpeedChanged { device, velocity } => {
                write!(f, "{} velocity: {:.4}", device, velocity)
            }
            DeviceEvent::StateChanged { device, is_on } => {
                write!(f, "{} {}", device, if *is_on { "on" } else { "off" })
            }
        }
    }
}

/// Tool change notification
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    /// Tool position changed
    PositionChanged(Vector3),
    /// Tool entered or left its working volume
    OutOfBoundsChanged(bool),
    /// Shutter engaged state changed
    ShutterChanged(bool),
}

/// Event dispatcher for publishing events to subscribers
#[derive(Debug, Clone)]
pub struct EventDispatcher<E: Clone> {
    /// Broadcast sender channel.
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventDispatcher<E> {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of receivers, zero when nobody is listening.
    pub fn publish(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new(100)
    }
}
