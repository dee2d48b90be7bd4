//! # MotionKit Scheduler
//!
//! Executes command lines against a controller graph:
//! - a FIFO of command lines fed by any number of producers
//! - the [`CommandManager`] consumer with its Idle/Processing/Stopped states
//! - periodic device state publication
//! - dry-run previews on a digital twin

pub mod error;
pub mod manager;
pub mod preview;
pub mod queue;
pub mod updater;

pub use error::SchedulerError;
pub use manager::{CommandManager, RunState};
pub use preview::{PreviewReport, PreviewRunner, ToolSample};
pub use queue::{CommandQueue, QueuedLine};
pub use updater::{update_states, StateUpdater};
