//! Devices
//!
//! A [`Device`] holds the runtime state of one positioner axis or one shutter.
//! Two copies of the state are kept:
//! - the controller-side state, mutated only through [`Device::modify`] while
//!   the owning controller's lock is held
//! - the published state, which observers read and which changes only when
//!   [`Device::publish`] copies the controller-side state over, emitting a
//!   [`DeviceEvent`] per changed field
//!
//! Each device also tracks the cancellation token of its last issued motion.
//! Starting a new motion cancels the previous one. Completions hold their
//! motion as an [`ActiveMotion`], which releases the slot when dropped.

use crate::lock::ControllerGuard;
use motionkit_core::{DeviceEvent, EventDispatcher};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Kind of hardware a device or controller deals with
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Linear or rotary positioning axis
    Positioner,
    /// Optical shutter
    Shutter,
    /// Coordinates other controllers, owns no devices
    Coordinator,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Positioner => write!(f, "positioner"),
            Capability::Shutter => write!(f, "shutter"),
            Capability::Coordinator => write!(f, "coordinator"),
        }
    }
}

/// Runtime state of a positioner axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionerState {
    /// Current position in axis units
    pub current_position: f64,
    /// Commanded cruise speed (unsigned)
    pub speed: f64,
    /// Instantaneous signed velocity
    pub velocity: f64,
    /// Commanded acceleration
    pub acceleration: f64,
    /// Commanded deceleration
    pub deceleration: f64,
    /// Upper limit for `speed`
    pub max_speed: f64,
    /// Upper limit for `acceleration`
    pub max_acceleration: f64,
    /// Upper limit for `deceleration`
    pub max_deceleration: f64,
}

impl Default for PositionerState {
    fn default() -> Self {
        Self {
            current_position: 0.0,
            speed: 10.0,
            velocity: 0.0,
            acceleration: 100.0,
            deceleration: 100.0,
            max_speed: 100.0,
            max_acceleration: 1000.0,
            max_deceleration: 1000.0,
        }
    }
}

impl PositionerState {
    /// Axis at `position` with the given motion parameters
    pub fn at(position: f64, speed: f64, acceleration: f64, deceleration: f64) -> Self {
        Self {
            current_position: position,
            speed,
            acceleration,
            deceleration,
            max_speed: speed.max(Self::default().max_speed),
            max_acceleration: acceleration.max(Self::default().max_acceleration),
            max_deceleration: deceleration.max(Self::default().max_deceleration),
            ..Self::default()
        }
    }
}

/// Runtime state of a shutter
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShutterState {
    /// Whether the shutter is open
    pub is_on: bool,
    /// Settling delay after opening
    pub delay_on: Duration,
    /// Settling delay after closing
    pub delay_off: Duration,
}

/// Kind-specific device state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Positioner axis
    Positioner(PositionerState),
    /// Shutter
    Shutter(ShutterState),
}

impl DeviceState {
    /// Capability implied by the state kind
    pub fn capability(&self) -> Capability {
        match self {
            DeviceState::Positioner(_) => Capability::Positioner,
            DeviceState::Shutter(_) => Capability::Shutter,
        }
    }

    /// Positioner state, if this is a positioner
    pub fn as_positioner(&self) -> Option<&PositionerState> {
        match self {
            DeviceState::Positioner(state) => Some(state),
            DeviceState::Shutter(_) => None,
        }
    }

    /// Shutter state, if this is a shutter
    pub fn as_shutter(&self) -> Option<&ShutterState> {
        match self {
            DeviceState::Shutter(state) => Some(state),
            DeviceState::Positioner(_) => None,
        }
    }
}

/// Handle of one issued motion
///
/// Generations increase per device, so finishing a stale ticket never clears
/// the slot of a newer motion.
#[derive(Debug, Clone)]
pub struct MotionTicket {
    generation: u64,
    token: CancellationToken,
}

impl MotionTicket {
    /// Generation number of the motion
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once a newer motion or a stop superseded this one
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the motion is superseded
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// A started motion bound to its device
///
/// Dropping it clears the device's motion slot if the motion is still the
/// active one, so a completion that fails or is abandoned never leaves its
/// device marked as moving.
#[derive(Debug)]
pub struct ActiveMotion {
    device: Arc<Device>,
    ticket: MotionTicket,
}

impl ActiveMotion {
    /// Start a motion on `device`, cancelling the one in flight
    pub fn begin(device: Arc<Device>, guard: &ControllerGuard) -> Self {
        let ticket = device.begin_motion(guard);
        Self { device, ticket }
    }

    /// The moving device
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Ticket of the motion
    pub fn ticket(&self) -> &MotionTicket {
        &self.ticket
    }

    /// True once a newer motion or a stop superseded this one
    pub fn is_cancelled(&self) -> bool {
        self.ticket.is_cancelled()
    }

    /// Resolves when the motion is superseded
    pub async fn cancelled(&self) {
        self.ticket.cancelled().await
    }
}

impl Drop for ActiveMotion {
    fn drop(&mut self) {
        self.device.finish_motion(&self.ticket);
    }
}

#[derive(Debug, Default)]
struct MotionSlot {
    generation: u64,
    active: Option<MotionTicket>,
}

/// A positioner axis or shutter
#[derive(Debug)]
pub struct Device {
    name: String,
    id: Uuid,
    state: RwLock<DeviceState>,
    published: RwLock<DeviceState>,
    events: EventDispatcher<DeviceEvent>,
    motion: Mutex<MotionSlot>,
}

impl Device {
    /// Create a device with the given initial state
    pub fn new(name: impl Into<String>, state: DeviceState) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            state: RwLock::new(state),
            published: RwLock::new(state),
            events: EventDispatcher::default(),
            motion: Mutex::new(MotionSlot::default()),
        }
    }

    /// Create a positioner axis
    pub fn positioner(name: impl Into<String>, state: PositionerState) -> Self {
        Self::new(name, DeviceState::Positioner(state))
    }

    /// Create a shutter
    pub fn shutter(name: impl Into<String>, state: ShutterState) -> Self {
        Self::new(name, DeviceState::Shutter(state))
    }

    /// Device name, unique within its controller
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device identity
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Capability implied by the device state
    pub fn capability(&self) -> Capability {
        self.state.read().capability()
    }

    /// Controller-side state snapshot
    pub fn state(&self) -> DeviceState {
        *self.state.read()
    }

    /// Published state snapshot
    pub fn published(&self) -> DeviceState {
        *self.published.read()
    }

    /// Controller-side positioner state
    pub fn positioner_state(&self) -> Option<PositionerState> {
        self.state.read().as_positioner().copied()
    }

    /// Controller-side shutter state
    pub fn shutter_state(&self) -> Option<ShutterState> {
        self.state.read().as_shutter().copied()
    }

    /// Mutate the controller-side state
    ///
    /// The guard proves that the owning controller's lock is held.
    pub fn modify<R>(&self, _guard: &ControllerGuard, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// Mutate the positioner state; `None` for shutters
    pub fn modify_positioner<R>(
        &self,
        guard: &ControllerGuard,
        f: impl FnOnce(&mut PositionerState) -> R,
    ) -> Option<R> {
        self.modify(guard, |state| match state {
            DeviceState::Positioner(p) => Some(f(p)),
            DeviceState::Shutter(_) => None,
        })
    }

    /// Mutate the shutter state; `None` for positioners
    pub fn modify_shutter<R>(
        &self,
        guard: &ControllerGuard,
        f: impl FnOnce(&mut ShutterState) -> R,
    ) -> Option<R> {
        self.modify(guard, |state| match state {
            DeviceState::Shutter(s) => Some(f(s)),
            DeviceState::Positioner(_) => None,
        })
    }

    /// Copy the controller-side state to the published state
    ///
    /// Returns the number of change events emitted.
    pub fn publish(&self) -> usize {
        let current = self.state();
        let previous = std::mem::replace(&mut *self.published.write(), current);

        let mut events = Vec::new();
        match (previous, current) {
            (DeviceState::Positioner(old), DeviceState::Positioner(new)) => {
                if old.current_position != new.current_position {
                    events.push(DeviceEvent::PositionChanged {
                        device: self.name.clone(),
                        position: new.current_position,
                    });
                }
                if old.velocity != new.velocity || old.speed != new.speed {
                    events.push(DeviceEvent::SpeedChanged {
                        device: self.name.clone(),
                        velocity: new.velocity,
                    });
                }
            }
            (DeviceState::Shutter(old), DeviceState::Shutter(new)) => {
                if old.is_on != new.is_on {
                    events.push(DeviceEvent::StateChanged {
                        device: self.name.clone(),
                        is_on: new.is_on,
                    });
                }
            }
            _ => {}
        }

        let count = events.len();
        for event in events {
            self.events.publish(event);
        }
        count
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Start a new motion, cancelling the one in flight
    pub fn begin_motion(&self, _guard: &ControllerGuard) -> MotionTicket {
        let mut slot = self.motion.lock();
        if let Some(previous) = slot.active.take() {
            tracing::debug!(
                "Device {} motion {} superseded",
                self.name,
                previous.generation
            );
            previous.token.cancel();
        }
        slot.generation += 1;
        let ticket = MotionTicket {
            generation: slot.generation,
            token: CancellationToken::new(),
        };
        slot.active = Some(ticket.clone());
        ticket
    }

    /// Clear the motion slot if `ticket` is still the active motion
    pub fn finish_motion(&self, ticket: &MotionTicket) {
        let mut slot = self.motion.lock();
        if slot
            .active
            .as_ref()
            .is_some_and(|active| active.generation == ticket.generation)
        {
            slot.active = None;
        }
    }

    /// Cancel the motion in flight, if any
    pub fn cancel_motion(&self) -> bool {
        match self.motion.lock().active.take() {
            Some(active) => {
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    /// True while a motion is in flight
    pub fn is_moving(&self) -> bool {
        self.motion.lock().active.is_some()
    }

    /// Generation of the last issued motion
    pub fn motion_generation(&self) -> u64 {
        self.motion.lock().generation
    }

    /// Deep copy with independent state, channels and identity
    pub fn duplicate(&self) -> Device {
        let copy = Device::new(self.name.clone(), self.state());
        *copy.published.write() = self.published();
        copy
    }
}
