//! Hardware transport contract
//!
//! Hardware-backed controllers talk to their firmware through a [`Transport`].
//! Framing and protocol details live behind the trait; controllers only see
//! typed requests and replies. [`LoopbackTransport`] is an in-memory
//! implementation with latency and fault injection, used by simulations and
//! tests.

use async_trait::async_trait;
use motionkit_core::{
    thread_safe_deque, thread_safe_rw_map, thread_safe_vec, HardwareError, Result,
    ThreadSafeDeque, ThreadSafeRwMap, ThreadSafeVec,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Request sent to the firmware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportRequest {
    /// Move an axis to an absolute position
    MoveTo {
        /// Axis name
        axis: String,
        /// Target position
        position: f64,
        /// Cruise speed
        speed: f64,
    },
    /// Update motion parameters of an axis
    Configure {
        /// Axis name
        axis: String,
        /// Cruise speed
        speed: f64,
        /// Acceleration
        acceleration: f64,
        /// Deceleration
        deceleration: f64,
    },
    /// Stop an axis
    Stop {
        /// Axis name
        axis: String,
    },
    /// Report the position of an axis
    QueryPosition {
        /// Axis name
        axis: String,
    },
}

impl TransportRequest {
    /// Short operation name for error reports
    pub fn operation(&self) -> &'static str {
        match self {
            TransportRequest::MoveTo { .. } => "move",
            TransportRequest::Configure { .. } => "configure",
            TransportRequest::Stop { .. } => "stop",
            TransportRequest::QueryPosition { .. } => "query position",
        }
    }
}

/// Firmware reply
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransportReply {
    /// Request accepted
    Ack,
    /// Reported axis position
    Position(f64),
}

/// Async execute/connect contract of a hardware link
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link
    async fn connect(&self) -> Result<()>;

    /// Whether the link is open
    fn is_connected(&self) -> bool;

    /// Send one request and wait for its reply
    async fn execute(&self, request: TransportRequest) -> Result<TransportReply>;
}

/// Run `operation` with an I/O timeout
pub async fn with_timeout<T>(
    operation: &str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
        .into()),
    }
}

/// In-memory transport
#[derive(Debug)]
pub struct LoopbackTransport {
    connected: AtomicBool,
    positions: ThreadSafeRwMap<String, f64>,
    latency: RwLock<Duration>,
    faults: ThreadSafeDeque<HardwareError>,
    requests: ThreadSafeVec<TransportRequest>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    /// Create a disconnected loopback
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            positions: thread_safe_rw_map(),
            latency: RwLock::new(Duration::ZERO),
            faults: thread_safe_deque(),
            requests: thread_safe_vec(),
        }
    }

    /// Delay every reply by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Fail the next request with `fault`
    pub fn inject_fault(&self, fault: HardwareError) {
        self.faults.lock().push_back(fault);
    }

    /// Position the firmware reports for `axis`
    pub fn position(&self, axis: &str) -> f64 {
        self.positions.read().get(axis).copied().unwrap_or(0.0)
    }

    /// Move an axis behind the controller's back
    pub fn set_position(&self, axis: &str, position: f64) {
        self.positions.write().insert(axis.to_string(), position);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<()> {
        let latency = *self.latency.read();
        tokio::time::sleep(latency).await;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, request: TransportRequest) -> Result<TransportReply> {
        if !self.is_connected() {
            return Err(HardwareError::NotConnected {
                controller: "loopback".to_string(),
            }
            .into());
        }

        let latency = *self.latency.read();
        tokio::time::sleep(latency).await;
        self.requests.lock().push(request.clone());

        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(fault.into());
        }

        let reply = match request {
            TransportRequest::MoveTo { axis, position, .. } => {
                self.set_position(&axis, position);
                TransportReply::Ack
            }
            TransportRequest::QueryPosition { axis } => TransportReply::Position(self.position(&axis)),
            TransportRequest::Configure { .. } | TransportRequest::Stop { .. } => TransportReply::Ack,
        };
        Ok(reply)
    }
}
