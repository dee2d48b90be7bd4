//! # MotionKit Control
//!
//! Device and controller graph for MotionKit:
//! - devices with lock-guarded mutation and motion supersession
//! - controller kinds (simulated, virtual and hardware-linked positioners,
//!   simulated and virtual shutters) behind one dispatch contract
//! - master controllers batching synchronized actions across slaves
//! - the controller manager, its type registry and digital-twin cloning
//! - tool tracking and single-axis kinematics

pub mod builder;
pub mod command;
pub mod controller;
pub mod device;
pub mod kinematics;
pub mod lock;
pub mod manager;
pub mod master;
pub mod registry;
pub mod tool;
pub mod transport;

pub use builder::{GraphBuilder, ToolSpec};
pub use command::{Action, Command, CommandLine};
pub use controller::{
    Completion, Controller, ControllerBase, LinkedPositioner, Outcome, PlannedStep,
    SimulatedPositioner, SimulatedShutter, VirtualPositioner, VirtualShutter,
};
pub use device::{
    ActiveMotion, Capability, Device, DeviceState, MotionTicket, PositionerState, ShutterState,
};
pub use kinematics::{plan_move, MotionProfile, MotionRequest, Phase, PhaseKind, ProfileShape};
pub use lock::{acquire_ordered, ControllerGuard, ControllerLock};
pub use manager::ControllerManager;
pub use master::MasterController;
pub use registry::{ControllerFactory, ControllerOptions, ControllerRegistry, SubstitutionRules};
pub use tool::{PositionFn, ToolInformation, ToolState};
pub use transport::{LoopbackTransport, Transport, TransportReply, TransportRequest};
