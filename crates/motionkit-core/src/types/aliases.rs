//! Type aliases for commonly used shared-state types.
//!
//! Controllers, the scheduler and the tool tracker all share state between
//! tokio tasks. These aliases name the handful of wrappers used for that so
//! the same pattern reads the same way in every crate.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use motionkit_core::types::*;
//!
//! // Instead of: Arc<Mutex<VecDeque<CommandLine>>>
//! let queue: ThreadSafeDeque<CommandLine> = thread_safe_deque();
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// A thread-safe, mutex-protected wrapper for cross-task sharing.
///
/// Uses `parking_lot::Mutex`; never hold the guard across an `.await`.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe vector for cross-task collection management.
pub type ThreadSafeVec<T> = Arc<Mutex<Vec<T>>>;

/// A thread-safe deque for cross-task queue management.
pub type ThreadSafeDeque<T> = Arc<Mutex<VecDeque<T>>>;

/// A thread-safe reader-writer lock wrapper for read-heavy state.
pub type ThreadSafeRw<T> = Arc<RwLock<T>>;

/// A thread-safe, name-ordered reader-writer map.
///
/// Ordered so that iteration (and therefore lock acquisition built on it) is
/// deterministic.
pub type ThreadSafeRwMap<K, V> = Arc<RwLock<BTreeMap<K, V>>>;

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

/// Create a new empty `ThreadSafeVec<T>`.
#[inline]
pub fn thread_safe_vec<T>() -> ThreadSafeVec<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Create a new empty `ThreadSafeDeque<T>`.
#[inline]
pub fn thread_safe_deque<T>() -> ThreadSafeDeque<T> {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Create a new `ThreadSafeRw<T>` from a value.
#[inline]
pub fn thread_safe_rw<T>(value: T) -> ThreadSafeRw<T> {
    Arc::new(RwLock::new(value))
}

/// Create a new empty `ThreadSafeRwMap<K, V>`.
#[inline]
pub fn thread_safe_rw_map<K: Ord, V>() -> ThreadSafeRwMap<K, V> {
    Arc::new(RwLock::new(BTreeMap::new()))
}
