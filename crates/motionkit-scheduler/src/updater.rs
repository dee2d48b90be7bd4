//! Periodic state publication
//!
//! Runs independently of command dispatch: it only publishes device state and
//! recalculates the tool, and hardware-backed controllers skip the refresh
//! while a command holds their lock.

use motionkit_control::ControllerManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle of the background state publication task
#[derive(Debug)]
pub struct StateUpdater {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl StateUpdater {
    /// Start publishing every `interval`
    pub fn spawn(controllers: Arc<ControllerManager>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(update_states(controllers, interval, shutdown.clone()));
        Self { shutdown, handle }
    }

    /// Whether the task is still running
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("State update task ended abnormally: {}", e);
        }
    }
}

/// Publish every controller's device state until `shutdown` is cancelled
pub async fn update_states(
    controllers: Arc<ControllerManager>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = controllers.refresh_states().await {
            tracing::warn!("State refresh failed: {}", e);
        }
        if let Some(tool) = controllers.tool_information() {
            tool.recalculate();
        }
    }
    tracing::debug!("State updates stopped");
}
