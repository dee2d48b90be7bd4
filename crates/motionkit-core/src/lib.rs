//! # MotionKit Core
//!
//! Core types, errors and events for MotionKit.
//! Provides the fundamental building blocks shared by the controller graph,
//! the scheduler and the preview tooling.

pub mod data;
pub mod error;
pub mod event;
pub mod log_sink;
pub mod types;

pub use data::{Bounds, Vector3};

pub use error::{
    ConfigurationError, DispatchError, Error, HardwareError, KinematicsError, Result,
};

pub use event::{DeviceEvent, EventDispatcher, ToolEvent};

pub use log_sink::{LogLevel, LogRecord, LogSink, MemoryLogSink, TracingLogSink};

// Re-export type aliases for convenience
pub use types::{
    thread_safe, thread_safe_deque, thread_safe_rw, thread_safe_rw_map, thread_safe_vec,
    ThreadSafe, ThreadSafeDeque, ThreadSafeRw, ThreadSafeRwMap, ThreadSafeVec,
};
