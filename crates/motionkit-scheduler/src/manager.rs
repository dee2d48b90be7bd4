//! Command manager
//!
//! The [`CommandManager`] drains the command queue strictly in order. Each
//! line is split by target controller: groups aimed at a master go through
//! its synchronized slave dispatch, other groups run their commands
//! concurrently. The next line starts only once every awaited command of the
//! current line has finished.
//!
//! State machine:
//! - `Idle -> Processing -> Idle` when the queue drains
//! - `Processing -> Stopped` on a failed awaited command or an explicit stop;
//!   a failed line first cancels the motions of every device it addressed
//! - `Stopped -> Idle` only through [`CommandManager::reset`]

use crate::error::SchedulerError;
use crate::queue::CommandQueue;
use crate::updater::StateUpdater;
use futures::future::try_join_all;
use motionkit_control::{Command, CommandLine, ControllerManager};
use motionkit_core::{thread_safe, Error, LogSink, Result, ThreadSafe};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Scheduler run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Waiting for lines
    Idle,
    /// Draining the queue
    Processing,
    /// Halted after a failure or an explicit stop
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Processing => write!(f, "Processing"),
            RunState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Top-level scheduler
pub struct CommandManager {
    controllers: Arc<ControllerManager>,
    queue: CommandQueue,
    state: watch::Sender<RunState>,
    log: Arc<dyn LogSink>,
    last_failure: ThreadSafe<Option<Error>>,
    interrupt: ThreadSafe<CancellationToken>,
    consumer: tokio::sync::Mutex<()>,
}

impl CommandManager {
    /// Create an idle scheduler over a controller graph
    pub fn new(controllers: Arc<ControllerManager>, log: Arc<dyn LogSink>) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            controllers,
            queue: CommandQueue::new(),
            state,
            log,
            last_failure: thread_safe(None),
            interrupt: thread_safe(CancellationToken::new()),
            consumer: tokio::sync::Mutex::new(()),
        }
    }

    /// The controller graph
    pub fn controllers(&self) -> &Arc<ControllerManager> {
        &self.controllers
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Subscribe to run state changes
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Error that stopped the scheduler, until the next reset
    pub fn last_failure(&self) -> Option<Error> {
        self.last_failure.lock().clone()
    }

    /// Number of lines waiting
    pub fn pending_lines(&self) -> usize {
        self.queue.len()
    }

    fn set_state(&self, next: RunState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("Scheduler {} -> {}", previous, next);
        }
    }

    /// Append a line to the queue and return its sequence number
    pub fn enqueue_command_line(
        &self,
        line: impl Into<CommandLine>,
    ) -> std::result::Result<u64, SchedulerError> {
        if self.state() == RunState::Stopped {
            return Err(SchedulerError::Stopped);
        }
        let line = line.into();
        let number = self.queue.push(line);
        tracing::trace!("Queued line {}", number);
        Ok(number)
    }

    /// Drain the queue in order
    ///
    /// Returns once the queue is empty, or with the error that stopped the
    /// scheduler.
    pub async fn start(&self) -> std::result::Result<(), SchedulerError> {
        let _consumer = self
            .consumer
            .try_lock()
            .map_err(|_| SchedulerError::AlreadyRunning)?;
        if self.state() == RunState::Stopped {
            return Err(SchedulerError::Stopped);
        }

        let interrupt = self.interrupt.lock().clone();
        self.set_state(RunState::Processing);

        while let Some(queued) = self.queue.pop() {
            self.log
                .info(&format!("Line {}: {}", queued.number, queued.line));

            let result = tokio::select! {
                biased;
                _ = interrupt.cancelled() => return Err(SchedulerError::Stopped),
                result = self.execute_line(&queued.line) => result,
            };
            if interrupt.is_cancelled() {
                return Err(SchedulerError::Stopped);
            }
            if let Err(error) = result {
                self.halt_line(queued.number, &queued.line).await;
                return Err(self.fail(queued.number, error));
            }
            self.log.info(&format!("Line {} done", queued.number));
        }

        self.state.send_if_modified(|state| {
            if *state == RunState::Processing {
                *state = RunState::Idle;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Drain lines as they arrive until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> std::result::Result<(), SchedulerError> {
        loop {
            if !self.queue.is_empty() {
                self.start().await?;
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = self.queue.notified() => {}
            }
        }
    }

    /// Dispatch every command of a line and wait for the awaited ones
    async fn execute_line(&self, line: &CommandLine) -> Result<()> {
        let mut groups: Vec<(String, Vec<Command>)> = Vec::new();
        for command in line {
            let target = self
                .controllers
                .route(command)
                .map_err(|e| e.in_command(command.to_string()))?;
            match groups.iter_mut().find(|(name, _)| *name == target) {
                Some((_, group)) => group.push(command.clone()),
                None => groups.push((target, vec![command.clone()])),
            }
        }

        try_join_all(
            groups
                .into_iter()
                .map(|(target, commands)| self.dispatch_group(target, commands)),
        )
        .await?;
        Ok(())
    }

    async fn dispatch_group(&self, target: String, commands: Vec<Command>) -> Result<()> {
        let controller = self.controllers.controller(&target)?;
        let lock = self.controllers.lock(&target)?;

        match controller.as_master() {
            Some(master) => {
                master.execute_slave_commands(&commands, &lock).await?;
            }
            None => {
                try_join_all(
                    commands
                        .iter()
                        .map(|command| controller.execute_command(command, &lock)),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Cancel the motions a failed line left running
    async fn halt_line(&self, number: u64, line: &CommandLine) {
        match self.controllers.halt_devices(line).await {
            Ok(0) => {}
            Ok(stopped) => self.log.warn(&format!(
                "Line {}: cancelled {} motion(s)",
                number, stopped
            )),
            Err(e) => tracing::warn!("Line {}: cancelling motions failed: {}", number, e),
        }
    }

    fn fail(&self, line: u64, error: Error) -> SchedulerError {
        let descriptor = match &error {
            Error::Command { command, .. } => command.clone(),
            _ => format!("line {}", line),
        };
        self.log.error(&format!(
            "Line {} failed at [{}]: {}",
            line,
            descriptor,
            error.root()
        ));
        tracing::error!("Line {} failed: {}", line, error);

        let dropped = self.queue.clear();
        if dropped > 0 {
            self.log
                .warn(&format!("Discarded {} queued line(s)", dropped));
        }
        *self.last_failure.lock() = Some(error.clone());
        self.set_state(RunState::Stopped);
        SchedulerError::LineFailed {
            line,
            source: error,
        }
    }

    /// Stop processing, discard the queue and cancel every motion in flight
    ///
    /// Returns the number of cancelled motions.
    pub async fn stop(&self) -> std::result::Result<usize, SchedulerError> {
        self.set_state(RunState::Stopped);
        self.interrupt.lock().cancel();
        let dropped = self.queue.clear();
        let stopped = self.controllers.stop_all_motion().await?;
        self.log.warn(&format!(
            "Stopped: {} queued line(s) discarded, {} motion(s) cancelled",
            dropped, stopped
        ));
        Ok(stopped)
    }

    /// Return to `Idle` and forget the last failure
    pub fn reset(&self) -> std::result::Result<(), SchedulerError> {
        if self.state() == RunState::Processing {
            return Err(SchedulerError::AlreadyRunning);
        }
        *self.interrupt.lock() = CancellationToken::new();
        *self.last_failure.lock() = None;
        self.set_state(RunState::Idle);
        self.log.info("Scheduler reset");
        Ok(())
    }

    /// Publish device states every `interval` on a background task
    pub fn spawn_state_updates(&self, interval: Duration) -> StateUpdater {
        StateUpdater::spawn(self.controllers.clone(), interval)
    }
}

impl fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandManager")
            .field("state", &self.state())
            .field("pending_lines", &self.pending_lines())
            .finish()
    }
}
