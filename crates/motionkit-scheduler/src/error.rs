//! Scheduler error types

use motionkit_core::Error;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// The scheduler is stopped and must be reset first
    #[error("Scheduler is stopped")]
    Stopped,

    /// Another task is already draining the queue
    #[error("Scheduler is already processing")]
    AlreadyRunning,

    /// A command line failed and the remaining queue was discarded
    #[error("Line {line} failed: {source}")]
    LineFailed {
        /// Sequence number of the failing line.
        line: u64,
        /// The command error.
        source: Error,
    },

    /// Error from the controller graph
    #[error(transparent)]
    Control(#[from] Error),
}

impl SchedulerError {
    /// The underlying control error, if any
    pub fn control_error(&self) -> Option<&Error> {
        match self {
            SchedulerError::LineFailed { source, .. } | SchedulerError::Control(source) => {
                Some(source)
            }
            _ => None,
        }
    }
}
