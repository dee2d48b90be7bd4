//! Controller locks
//!
//! Every controller is guarded by a binary semaphore. Holding a
//! [`ControllerGuard`] is the only way to mutate that controller's devices.
//! Batches spanning several controllers take their locks through
//! [`acquire_ordered`], which always locks in controller-name order.

use motionkit_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Binary semaphore owned by one controller
#[derive(Clone)]
pub struct ControllerLock {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
}

impl ControllerLock {
    /// Create an open lock for the named controller
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Name of the controller this lock guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the lock
    pub async fn acquire(&self) -> Result<ControllerGuard> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::LockClosed {
                controller: self.name.to_string(),
            })?;
        Ok(ControllerGuard {
            controller: self.name.clone(),
            _permit: permit,
        })
    }

    /// Take the lock only if it is free
    pub fn try_acquire(&self) -> Option<ControllerGuard> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ControllerGuard {
                controller: self.name.clone(),
                _permit: permit,
            })
    }

    /// True while someone holds the lock
    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// True when both handles refer to the same semaphore
    pub fn same_as(&self, other: &ControllerLock) -> bool {
        Arc::ptr_eq(&self.semaphore, &other.semaphore)
    }
}

impl fmt::Debug for ControllerLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Proof that a controller's lock is held; released on drop
pub struct ControllerGuard {
    controller: Arc<str>,
    _permit: OwnedSemaphorePermit,
}

impl ControllerGuard {
    /// Name of the locked controller
    pub fn controller(&self) -> &str {
        &self.controller
    }
}

impl fmt::Debug for ControllerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerGuard")
            .field("controller", &self.controller)
            .finish()
    }
}

/// Acquire several locks in controller-name order
///
/// Duplicate entries are locked once. The returned guards are sorted by
/// controller name.
pub async fn acquire_ordered(
    locks: impl IntoIterator<Item = ControllerLock>,
) -> Result<Vec<ControllerGuard>> {
    let mut locks: Vec<ControllerLock> = locks.into_iter().collect();
    locks.sort_by(|a, b| a.name.cmp(&b.name));
    locks.dedup_by(|a, b| a.name == b.name);

    let mut guards = Vec::with_capacity(locks.len());
    for lock in &locks {
        guards.push(lock.acquire().await?);
    }
    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_is_binary() {
        let lock = ControllerLock::new("x-stage");
        let guard = lock.acquire().await.unwrap();
        assert!(lock.is_locked());
        assert!(lock.try_acquire().is_none());
        assert_eq!(guard.controller(), "x-stage");

        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_ordered_acquisition_sorts_and_dedups() {
        let y = ControllerLock::new("y");
        let x = ControllerLock::new("x");
        let guards = acquire_ordered([y.clone(), x.clone(), y.clone()]).await.unwrap();

        let names: Vec<&str> = guards.iter().map(|g| g.controller()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert!(x.is_locked() && y.is_locked());
    }

    #[tokio::test]
    async fn test_overlapping_sets_do_not_deadlock() {
        let x = ControllerLock::new("x");
        let y = ControllerLock::new("y");
        let z = ControllerLock::new("z");

        let mut tasks = Vec::new();
        for i in 0..50 {
            let set = if i % 2 == 0 {
                vec![y.clone(), x.clone()]
            } else {
                vec![z.clone(), y.clone()]
            };
            tasks.push(tokio::spawn(async move {
                let guards = acquire_ordered(set).await.unwrap();
                tokio::task::yield_now().await;
                drop(guards);
            }));
        }

        let all = futures::future::join_all(tasks);
        let results = tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("ordered acquisition deadlocked");
        assert!(results.into_iter().all(|r| r.is_ok()));
    }
}
